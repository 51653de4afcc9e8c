//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every custom resource managed by the operator
pub const API_GROUP: &str = "operator.aquasec.com";

/// API version of every custom resource managed by the operator
pub const API_VERSION: &str = "v1alpha1";

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "aqua-operator";

/// Finalizer placed on entities that own cluster-scoped children
pub const CLUSTER_CHILDREN_FINALIZER: &str = "operator.aquasec.com/cluster-scoped-children";

/// Label carrying the uid of the owning entity (back-reference on every child)
pub const OWNER_UID_LABEL: &str = "operator.aquasec.com/owner-uid";

/// Label carrying the kind of the owning entity
pub const OWNER_KIND_LABEL: &str = "operator.aquasec.com/owner-kind";

/// Label carrying the namespaced name of the owning entity (`namespace.name`)
pub const OWNER_NAME_LABEL: &str = "operator.aquasec.com/owner";

/// Pod template annotation holding the checksum of mounted configuration
pub const CONFIG_CHECKSUM_ANNOTATION: &str = "operator.aquasec.com/config-checksum";

/// Workload annotation listing the env vars, mounts and volumes the operator wrote
pub const OWNED_ENTRIES_ANNOTATION: &str = "operator.aquasec.com/owned-entries";

/// `app.kubernetes.io/managed-by` value for synthesized objects
pub const MANAGED_BY: &str = "aqua-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default steady-state requeue interval (seconds)
/// Drift-detection heartbeat for converged entities
pub const DEFAULT_STEADY_STATE_REQUEUE_SECS: u64 = 300;

/// Default requeue interval while waiting on a dependency, peer or rollout (seconds)
pub const DEFAULT_DEPENDENCY_POLL_SECS: u64 = 10;

/// Default error backoff starting value (seconds)
pub const DEFAULT_ERROR_BACKOFF_START_SECS: u64 = 1;

/// Default error backoff maximum value (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Default watch stream backoff starting value (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Default watch stream backoff maximum value (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default maximum number of concurrent reconciliations per entity kind
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 4;

/// Default image registry
pub const DEFAULT_REGISTRY: &str = "registry.aquasec.com";

/// Default platform version
pub const DEFAULT_VERSION: &str = "2022.4";

/// Platform versions the operator knows how to deploy
/// Other versions are rejected unless `allowAnyVersion` is set
pub const SUPPORTED_VERSIONS: &[&str] = &["2022.4", "6.5", "6.2"];

/// Default platform flavour
pub const DEFAULT_PLATFORM: &str = "kubernetes";

/// Default service account for platform workloads
pub const DEFAULT_SERVICE_ACCOUNT: &str = "aqua-sa";

/// Default image pull secret
pub const DEFAULT_IMAGE_PULL_SECRET: &str = "aqua-registry";

/// Default database volume size in GiB
pub const DEFAULT_DB_DISK_SIZE_GI: i32 = 10;

/// Default starboard image registry and tag
pub const STARBOARD_REGISTRY: &str = "docker.io/aquasec";
pub const STARBOARD_VERSION: &str = "0.15.10";

/// Default starboard batch delete settings
pub const DEFAULT_BATCH_DELETE_LIMIT: i32 = 3;
pub const DEFAULT_BATCH_DELETE_DELAY: &str = "10s";

/// Well-known ports
pub const DATABASE_PORT: i32 = 5432;
pub const GATEWAY_PORT: i32 = 8443;
pub const GATEWAY_HEALTH_PORT: i32 = 8082;
pub const GATEWAY_SSH_PORT: i32 = 3622;
pub const SERVER_HTTP_PORT: i32 = 8080;
pub const SERVER_HTTPS_PORT: i32 = 8443;
pub const KUBE_ENFORCER_WEBHOOK_PORT: i32 = 8443;
pub const KUBE_ENFORCER_SERVICE_PORT: i32 = 443;
