//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::entity::Entity;
use crate::controller::object::ObjectKey;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::requeue::RequeueReason;
use crate::observability;
use crate::runtime::watch_loop::WatchContext;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with per-resource exponential backoff
///
/// Backoff state is tracked per resource so one failing entity does not slow
/// down the others. It is reset by the next successful pass.
pub fn handle_reconciliation_error<E: Entity>(
    obj: Arc<E>,
    error: &ReconcilerError,
    ctx: Arc<WatchContext>,
) -> Action {
    let key = ObjectKey::from_meta(obj.meta());
    let kind = E::KIND;

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind.as_str(),
        resource.name = key.name.as_str(),
        resource.namespace = key.namespace.as_deref().unwrap_or_default(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}: {:?}", kind, key, error);
    observability::increment_reconciliation_errors(kind.as_str());

    let backoff_key = Reconciler::backoff_key(kind.object_kind(), &key);
    let (delay, error_count) = ctx.reconciler.next_error_backoff(&backoff_key);
    let next_trigger_time = ctx.reconciler.clock.now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

    info!(
        error_count,
        next_retry = %next_trigger_time.to_rfc3339(),
        "Retrying in {}s with exponential backoff",
        delay.as_secs()
    );

    observability::increment_requeues(RequeueReason::Error.as_str());
    Action::requeue(delay)
}

/// Watch stream failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    Unauthorized,
    ResourceVersionExpired,
    Throttled,
    NotFound,
    Other,
}

impl WatchErrorClass {
    /// Classify a watch error by its rendered message
    ///
    /// 404 is checked before 401 since a plain-text 404 body surfaces as a
    /// decode error that also mentions the failed watch.
    pub fn classify(error: &str) -> Self {
        let is_not_found =
            error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
        if (error.contains("401") || error.contains("Unauthorized")) && !is_not_found {
            WatchErrorClass::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorClass::ResourceVersionExpired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorClass::Throttled
        } else if is_not_found {
            WatchErrorClass::NotFound
        } else {
            WatchErrorClass::Other
        }
    }
}

/// Handle watch stream errors with classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    kind: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource.kind = kind,
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorClass::classify(error_string) {
        WatchErrorClass::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired");
            error!("Check that the operator's ClusterRole and ClusterRoleBinding still exist and grant list/watch on {}", kind);
            warn!(
                "Waiting {}s before retrying watch...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorClass::ResourceVersionExpired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorClass::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server throttling or reinitializing storage (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorClass::NotFound => {
            warn!(
                "{} not found (404), the object was deleted or the CRD is not installed: {}",
                kind, error_string
            );
            Some(())
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_error_classification() {
        assert_eq!(
            WatchErrorClass::classify("ApiError: Unauthorized (401)"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            WatchErrorClass::classify("WatchFailed: too old resource version"),
            WatchErrorClass::ResourceVersionExpired
        );
        assert_eq!(
            WatchErrorClass::classify("storage is (re)initializing"),
            WatchErrorClass::Throttled
        );
        assert_eq!(
            WatchErrorClass::classify("WatchFailed: invalid type: integer `404`"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            WatchErrorClass::classify("connection reset by peer"),
            WatchErrorClass::Other
        );
    }

    #[tokio::test]
    async fn test_throttled_watch_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1);
        let outcome = handle_watch_stream_error(
            "AquaCsp",
            "429 TooManyRequests",
            &backoff,
            3,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(outcome, None);
        assert_eq!(backoff.load(Ordering::Relaxed), 2);

        handle_watch_stream_error("AquaCsp", "429", &backoff, 3, Duration::from_millis(1)).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }
}
