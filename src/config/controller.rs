//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::controller::defaults::PlatformDefaults;
use crate::controller::requeue::RequeuePolicy;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Steady-state requeue interval (seconds)
    /// How often a converged entity is re-checked for external drift
    pub steady_state_requeue_secs: u64,
    /// Dependency poll interval (seconds)
    /// How often an entity waiting on an upstream entity, peer or rollout is re-checked
    pub dependency_poll_secs: u64,
    /// Error backoff starting value (seconds)
    pub error_backoff_start_secs: u64,
    /// Error backoff maximum value (seconds)
    pub error_backoff_max_secs: u64,
    /// Watch stream backoff starting value (milliseconds)
    pub watch_backoff_start_ms: u64,
    /// Watch stream backoff maximum value (milliseconds)
    pub watch_backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Maximum concurrent reconciliations per entity kind
    pub max_concurrent_reconciliations: u16,
    /// Controller namespace
    pub controller_namespace: String,
    /// Registry used when an image does not name one
    pub default_registry: String,
    /// Platform version used when an entity does not name one
    pub default_version: String,
    /// Platform flavour used when an entity does not name one
    pub default_platform: String,
    /// Service account used when an entity does not name one
    pub default_service_account: String,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Enable color in text format logs
    pub log_enable_color: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            steady_state_requeue_secs: DEFAULT_STEADY_STATE_REQUEUE_SECS,
            dependency_poll_secs: DEFAULT_DEPENDENCY_POLL_SECS,
            error_backoff_start_secs: DEFAULT_ERROR_BACKOFF_START_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
            watch_backoff_start_ms: DEFAULT_WATCH_BACKOFF_START_MS,
            watch_backoff_max_ms: DEFAULT_WATCH_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            controller_namespace: "aqua".to_string(),
            default_registry: DEFAULT_REGISTRY.to_string(),
            default_version: DEFAULT_VERSION.to_string(),
            default_platform: DEFAULT_PLATFORM.to_string(),
            default_service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
            log_enable_color: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            steady_state_requeue_secs: env_var_or_default(
                "STEADY_STATE_REQUEUE_SECS",
                DEFAULT_STEADY_STATE_REQUEUE_SECS,
            ),
            dependency_poll_secs: env_var_or_default(
                "DEPENDENCY_POLL_SECS",
                DEFAULT_DEPENDENCY_POLL_SECS,
            ),
            error_backoff_start_secs: env_var_or_default(
                "ERROR_BACKOFF_START_SECS",
                DEFAULT_ERROR_BACKOFF_START_SECS,
            ),
            error_backoff_max_secs: env_var_or_default(
                "ERROR_BACKOFF_MAX_SECS",
                DEFAULT_ERROR_BACKOFF_MAX_SECS,
            ),
            watch_backoff_start_ms: env_var_or_default(
                "WATCH_BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: env_var_or_default(
                "WATCH_BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            controller_namespace: env_var_or_default_str("POD_NAMESPACE", "aqua"),
            default_registry: env_var_or_default_str("DEFAULT_REGISTRY", DEFAULT_REGISTRY),
            default_version: env_var_or_default_str("DEFAULT_VERSION", DEFAULT_VERSION),
            default_platform: env_var_or_default_str("DEFAULT_PLATFORM", DEFAULT_PLATFORM),
            default_service_account: env_var_or_default_str(
                "DEFAULT_SERVICE_ACCOUNT",
                DEFAULT_SERVICE_ACCOUNT,
            ),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
            log_enable_color: env_var_or_default_bool("LOG_ENABLE_COLOR", false),
        }
    }

    /// Get steady-state requeue duration
    pub fn steady_state_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.steady_state_requeue_secs)
    }

    /// Get dependency poll duration
    pub fn dependency_poll_duration(&self) -> Duration {
        Duration::from_secs(self.dependency_poll_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }

    /// Requeue policy derived from the configured intervals
    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            steady_state: self.steady_state_requeue_duration(),
            dependency_poll: self.dependency_poll_duration(),
            error_backoff_start_secs: self.error_backoff_start_secs,
            error_backoff_max_secs: self.error_backoff_max_secs,
        }
    }

    /// Platform defaults applied by the defaulting tables
    pub fn platform_defaults(&self) -> PlatformDefaults {
        PlatformDefaults {
            registry: self.default_registry.clone(),
            version: self.default_version.clone(),
            platform: self.default_platform.clone(),
            service_account: self.default_service_account.clone(),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(
            config.steady_state_requeue_duration(),
            Duration::from_secs(crate::constants::DEFAULT_STEADY_STATE_REQUEUE_SECS)
        );
        assert_eq!(
            config.dependency_poll_duration(),
            Duration::from_secs(crate::constants::DEFAULT_DEPENDENCY_POLL_SECS)
        );
    }

    #[test]
    fn test_requeue_policy_uses_configured_intervals() {
        let config = ControllerConfig {
            steady_state_requeue_secs: 120,
            dependency_poll_secs: 3,
            ..ControllerConfig::default()
        };
        let policy = config.requeue_policy();
        assert_eq!(policy.steady_state, Duration::from_secs(120));
        assert_eq!(policy.dependency_poll, Duration::from_secs(3));
    }

    #[test]
    fn test_platform_defaults_copy_configured_values() {
        let config = ControllerConfig {
            default_registry: "mirror.example.com".to_string(),
            ..ControllerConfig::default()
        };
        let defaults = config.platform_defaults();
        assert_eq!(defaults.registry, "mirror.example.com");
        assert_eq!(defaults.version, crate::constants::DEFAULT_VERSION);
    }

    #[test]
    fn test_env_var_or_default_bool_falls_back() {
        assert!(env_var_or_default_bool(
            "AQUA_OPERATOR_TEST_UNSET_BOOL_FLAG",
            true
        ));
    }
}
