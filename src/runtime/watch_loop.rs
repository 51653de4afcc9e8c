//! # Watch Loop
//!
//! One `kube_runtime::Controller` per entity kind. Each watches its custom
//! resource plus the children it owns, and restarts when its stream ends.

use crate::config::SharedControllerConfig;
use crate::constants::{CLUSTER_CHILDREN_FINALIZER, OWNER_KIND_LABEL};
use crate::controller::cascade;
use crate::controller::entity::Entity;
use crate::controller::graph::EntityKind;
use crate::controller::object::ObjectKey;
use crate::controller::reconciler::{reconcile_entity, Reconciler, ReconcilerError};
use crate::crd::{
    AquaCsp, AquaDatabase, AquaEnforcer, AquaGateway, AquaKubeEnforcer, AquaServer,
    AquaStarboard,
};
use crate::observability;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{Action, Config as ControllerRunConfig};
use kube_runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Context handed to every controller
pub struct WatchContext {
    pub reconciler: Reconciler,
    /// Used for finalizer patches, which go straight to the API server
    pub client: Client,
}

impl std::fmt::Debug for WatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchContext")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Run a controller for every entity kind until shutdown
pub async fn run_controllers(
    ctx: Arc<WatchContext>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) {
    let shutdown_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    tokio::join!(
        run_watch_loop::<AquaCsp>(ctx.clone(), server_state.clone(), controller_config.clone()),
        run_watch_loop::<AquaDatabase>(ctx.clone(), server_state.clone(), controller_config.clone()),
        run_watch_loop::<AquaGateway>(ctx.clone(), server_state.clone(), controller_config.clone()),
        run_watch_loop::<AquaServer>(ctx.clone(), server_state.clone(), controller_config.clone()),
        run_watch_loop::<AquaEnforcer>(ctx.clone(), server_state.clone(), controller_config.clone()),
        run_watch_loop::<AquaKubeEnforcer>(
            ctx.clone(),
            server_state.clone(),
            controller_config.clone()
        ),
        run_watch_loop::<AquaStarboard>(ctx, server_state, controller_config),
    );

    info!("Controllers stopped gracefully");
}

/// Watch loop for one entity kind with automatic restart
pub async fn run_watch_loop<E: Entity>(
    ctx: Arc<WatchContext>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) {
    let kind = E::KIND.as_str();
    let backoff_start_ms = controller_config.read().await.watch_backoff_start_ms;
    let backoff_ms = Arc::new(AtomicU64::new(backoff_start_ms));

    loop {
        if !server_state.is_ready() {
            info!(resource.kind = kind, "Shutdown requested, exiting watch loop");
            break;
        }

        let config = controller_config.read().await;
        let concurrency = config.max_concurrent_reconciliations;
        drop(config);

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            resource.kind = kind
        );
        info!(resource.kind = kind, "Starting controller watch loop...");

        let entities: Api<E> = Api::all(ctx.client.clone());
        let controller = Controller::new(entities, watcher::Config::default().any_semantic())
            .with_config(ControllerRunConfig::default().concurrency(concurrency));
        let backoff = backoff_ms.clone();
        let config_for_filter = controller_config.clone();

        watch_children::<E>(controller, &ctx.client)
            .shutdown_on_signal()
            .run(reconcile_object::<E>, handle_reconciliation_error::<E>, ctx.clone())
            .filter_map(move |event| {
                let backoff = backoff.clone();
                let config = config_for_filter.clone();
                async move {
                    match &event {
                        Ok(_) => {
                            let start = config.read().await.watch_backoff_start_ms;
                            backoff.store(start, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(event)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            let config = config.read().await;
                            let max_backoff = config.watch_backoff_max_ms;
                            let restart_delay = config.watch_restart_delay_duration();
                            drop(config);
                            handle_watch_stream_error(
                                kind,
                                &error_string,
                                &backoff,
                                max_backoff,
                                restart_delay,
                            )
                            .await
                            .map(|()| event)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready() {
            info!(resource.kind = kind, "Shutdown requested, exiting watch loop");
            break;
        }

        observability::increment_watch_restarts(kind);
        let delay = controller_config
            .read()
            .await
            .watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }
}

/// Add watches for the children an entity of kind `E` owns
///
/// Children are filtered by the owner kind label so each controller only
/// sees its own.
fn watch_children<E: Entity>(controller: Controller<E>, client: &Client) -> Controller<E> {
    let owned = || {
        watcher::Config::default().labels(&format!("{OWNER_KIND_LABEL}={}", E::KIND.as_str()))
    };
    let controller = controller
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<DaemonSet>::all(client.clone()), owned())
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Secret>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned());

    match E::KIND {
        EntityKind::Csp => controller
            .owns(Api::<AquaDatabase>::all(client.clone()), owned())
            .owns(Api::<AquaGateway>::all(client.clone()), owned())
            .owns(Api::<AquaServer>::all(client.clone()), owned())
            .owns(Api::<AquaEnforcer>::all(client.clone()), owned())
            .owns(Api::<AquaKubeEnforcer>::all(client.clone()), owned()),
        EntityKind::KubeEnforcer => {
            controller.owns(Api::<AquaStarboard>::all(client.clone()), owned())
        }
        _ => controller,
    }
}

/// Reconcile one watched object
///
/// Kinds with cluster-scoped children run under a finalizer so those
/// children are released before the entity disappears.
async fn reconcile_object<E: Entity>(
    obj: Arc<E>,
    ctx: Arc<WatchContext>,
) -> Result<Action, ReconcilerError> {
    let key = ObjectKey::from_meta(obj.meta());
    if !cascade::owns_cluster_scoped(E::KIND) {
        return reconcile_entity::<E>(&ctx.reconciler, &key)
            .await
            .map(|outcome| outcome.action);
    }

    let namespace = key.namespace.clone().unwrap_or_default();
    let entities: Api<E> = Api::namespaced(ctx.client.clone(), &namespace);
    let pass_ctx = ctx.clone();
    finalizer(&entities, CLUSTER_CHILDREN_FINALIZER, obj, move |event| async move {
        match event {
            FinalizerEvent::Apply(_) => reconcile_entity::<E>(&pass_ctx.reconciler, &key)
                .await
                .map(|outcome| outcome.action),
            FinalizerEvent::Cleanup(entity) => {
                let uid = entity.meta().uid.clone().unwrap_or_default();
                let released =
                    cascade::release_cluster_scoped(pass_ctx.reconciler.store.as_ref(), &uid)
                        .await?;
                info!(
                    resource.kind = E::KIND.as_str(),
                    resource.name = key.name.as_str(),
                    released,
                    "Released cluster-scoped children"
                );
                observability::clear_entity_state(E::KIND.as_str(), &namespace, &key.name);
                pass_ctx
                    .reconciler
                    .forget_backoff(&Reconciler::backoff_key(E::KIND.object_kind(), &key));
                Ok::<_, ReconcilerError>(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)))
}
