//! # Initialization
//!
//! Operator startup: rustls provider, tracing, metrics, HTTP server,
//! Kubernetes client and store, and a reconcile of entities that already
//! exist before the watches start.

use crate::config::{SharedControllerConfig, SharedServerConfig};
use crate::controller::clock::SystemClock;
use crate::controller::graph::EntityKind;
use crate::controller::object::Object;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::store::{KubeStore, Selector};
use crate::observability;
use crate::runtime::watch_loop::WatchContext;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Everything the watch loops need
pub struct InitializationResult {
    pub context: Arc<WatchContext>,
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    pub server_config: SharedServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// Tracing must already be installed (see [`crate::observability::logging`]).
pub async fn initialize(
    controller_config: SharedControllerConfig,
    server_config: SharedServerConfig,
) -> Result<InitializationResult> {
    // Required for rustls 0.23+ before any TLS connection is opened
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting Aqua operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let (port, startup_timeout, poll_interval) = {
        let config = server_config.read().await;
        (config.metrics_port, config.startup_timeout(), config.poll_interval())
    };
    let server_handle = {
        let state = server_state.clone();
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        })
    };
    wait_for_server_ready(&server_state, &server_handle, startup_timeout, poll_interval).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let reconciler = {
        let config = controller_config.read().await;
        Reconciler::new(
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(SystemClock),
            config.requeue_policy(),
            config.platform_defaults(),
        )
    };

    reconcile_existing_resources(&reconciler).await;

    info!("Operator initialized, starting watch loops...");
    Ok(InitializationResult {
        context: Arc::new(WatchContext { reconciler, client }),
        server_state,
        controller_config,
        server_config,
    })
}

/// Wait for the HTTP server to bind
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: std::time::Duration,
    poll_interval: std::time::Duration,
) -> Result<()> {
    let start_time = std::time::Instant::now();
    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Reconcile entities created while the operator was down
///
/// Failures are logged and left to the watch loops.
async fn reconcile_existing_resources(reconciler: &Reconciler) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        operation = "reconcile_existing_resources"
    );
    async {
        for kind in EntityKind::ALL.iter().copied() {
            let entities = match reconciler
                .store
                .list(kind.object_kind(), &Selector::default())
                .await
            {
                Ok(entities) => entities,
                Err(e) => {
                    error!(resource.kind = kind.as_str(), error = %e, "CRD is not queryable. Is it installed?");
                    warn!("Continuing, the watch loop will retry");
                    continue;
                }
            };
            if entities.is_empty() {
                continue;
            }

            log_summary(kind, &entities);
            for entity in &entities {
                let key = entity.key();
                match reconcile(reconciler, kind, &key).await {
                    Ok(outcome) => info!(
                        resource.kind = kind.as_str(),
                        resource.name = key.name.as_str(),
                        state = ?outcome.state,
                        "reconciliation.success"
                    ),
                    Err(e) => error!(
                        resource.kind = kind.as_str(),
                        resource.name = key.name.as_str(),
                        error = %e,
                        "reconciliation.error"
                    ),
                }
            }
        }
    }
    .instrument(span)
    .await;
}

fn log_summary(kind: EntityKind, entities: &[Object]) {
    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entity in entities {
        by_namespace
            .entry(entity.meta().namespace.clone().unwrap_or_default())
            .or_default()
            .push(entity.name().to_string());
    }
    info!(
        "Found {} existing {} resources in {} namespaces",
        entities.len(),
        kind,
        by_namespace.len()
    );
    for (namespace, mut names) in by_namespace {
        names.sort();
        let shown = if names.len() <= 3 {
            names.join(", ")
        } else {
            format!("{}, ... ({} total)", names[..3].join(", "), names.len())
        };
        info!("  {}: {}", namespace, shown);
    }
}
