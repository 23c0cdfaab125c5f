//! Built-in attribute keys for the plan, operator, and port scopes.

use std::sync::Arc;
use std::sync::Once;

use crate::attr::{display_codec, register_key, Attr};
use crate::plan::metrics::{DimensionsScheme, MetricsAggregator};
use crate::plan::operator::{Partitioner, ProcessingMode};

// ---- Plan scope ----

/// Selects a faster but less-tested publisher/subscriber transport.
pub static FAST_PUBLISHER_SUBSCRIBER: Attr<bool> =
    Attr::with_codec("plan.fast_publisher_subscriber", Some(false), display_codec());

/// Lifetime of filesystem delegation tokens, in milliseconds.
pub static HDFS_TOKEN_LIFE_TIME: Attr<u64> =
    Attr::with_codec("plan.hdfs_token_life_time", Some(604_800_000), display_codec());

/// Lifetime of resource-manager delegation tokens, in milliseconds.
pub static RM_TOKEN_LIFE_TIME: Attr<u64> =
    Attr::with_codec("plan.rm_token_life_time", Some(604_800_000), display_codec());

/// Path to the Kerberos keytab file.
pub static KEY_TAB_FILE: Attr<String> =
    Attr::with_codec("plan.key_tab_file", None, display_codec());

/// Fraction of a token's lifetime after which it is refreshed.
pub static TOKEN_REFRESH_ANTICIPATORY_FACTOR: Attr<f64> = Attr::with_codec(
    "plan.token_refresh_anticipatory_factor",
    Some(0.7),
    display_codec(),
);

/// Licensing metadata.
pub static LICENSE: Attr<String> = Attr::with_codec("plan.license", None, display_codec());

/// Root path for licensing metadata.
pub static LICENSE_ROOT: Attr<String> =
    Attr::with_codec("plan.license_root", None, display_codec());

/// Comma-separated jar dependencies staged with the application.
pub static LIBRARY_JARS: Attr<String> =
    Attr::with_codec("plan.library_jars", None, display_codec());

/// Comma-separated archives staged with the application.
pub static ARCHIVES: Attr<String> = Attr::with_codec("plan.archives", None, display_codec());

/// Comma-separated files staged with the application.
pub static FILES: Attr<String> = Attr::with_codec("plan.files", None, display_codec());

/// Upper bound on container requests, excluding the master.
pub static CONTAINERS_MAX_COUNT: Attr<i32> =
    Attr::with_codec("plan.containers_max_count", Some(i32::MAX), display_codec());

/// Persistent root directory for checkpoints, stats, and events.
/// Required at launch.
pub static APPLICATION_PATH: Attr<String> =
    Attr::with_codec("plan.application_path", None, display_codec());

/// Enables debug behavior in the master and containers.
pub static DEBUG: Attr<bool> = Attr::with_codec("plan.debug", Some(false), display_codec());

/// Memory, in megabytes, granted to the application master.
pub static MASTER_MEMORY_MB: Attr<u32> =
    Attr::with_codec("plan.master_memory_mb", Some(1024), display_codec());

/// Extra JVM options passed to launched containers.
pub static CONTAINER_JVM_OPTIONS: Attr<String> =
    Attr::with_codec("plan.container_jvm_options", None, display_codec());

// ---- Operator scope ----

/// Delivery-semantics contract of the operator. Unset means the engine
/// default (at-least-once).
pub static PROCESSING_MODE: Attr<ProcessingMode> =
    Attr::with_codec("operator.processing_mode", None, display_codec());

/// Number of streaming windows between checkpoints.
pub static CHECKPOINT_WINDOW_COUNT: Attr<u32> =
    Attr::with_codec("operator.checkpoint_window_count", Some(60), display_codec());

/// Number of streaming windows per application window.
pub static APPLICATION_WINDOW_COUNT: Attr<u32> =
    Attr::with_codec("operator.application_window_count", Some(1), display_codec());

/// Explicit partitioner overriding the operator's own capability.
pub static PARTITIONER: Attr<Arc<dyn Partitioner>> = Attr::new("operator.partitioner", None);

/// Explicit metrics aggregator; suppresses auto-metric inference.
pub static METRICS_AGGREGATOR: Attr<Arc<dyn MetricsAggregator>> =
    Attr::new("operator.metrics_aggregator", None);

/// Dimensions scheme bundled into the operator's metric metadata.
pub static METRICS_DIMENSIONS_SCHEME: Attr<Arc<dyn DimensionsScheme>> =
    Attr::new("operator.metrics_dimensions_scheme", None);

// ---- Port scope ----

/// Requests partitioning parallel to the upstream operator.
pub static PARTITION_PARALLEL: Attr<bool> =
    Attr::with_codec("port.partition_parallel", Some(false), display_codec());

/// Registers every built-in key with the attribute registry so encoded
/// plans can rebind on load. Idempotent.
pub fn register_builtins() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_key(&FAST_PUBLISHER_SUBSCRIBER);
        register_key(&HDFS_TOKEN_LIFE_TIME);
        register_key(&RM_TOKEN_LIFE_TIME);
        register_key(&KEY_TAB_FILE);
        register_key(&TOKEN_REFRESH_ANTICIPATORY_FACTOR);
        register_key(&LICENSE);
        register_key(&LICENSE_ROOT);
        register_key(&LIBRARY_JARS);
        register_key(&ARCHIVES);
        register_key(&FILES);
        register_key(&CONTAINERS_MAX_COUNT);
        register_key(&APPLICATION_PATH);
        register_key(&DEBUG);
        register_key(&MASTER_MEMORY_MB);
        register_key(&CONTAINER_JVM_OPTIONS);
        register_key(&PROCESSING_MODE);
        register_key(&CHECKPOINT_WINDOW_COUNT);
        register_key(&APPLICATION_WINDOW_COUNT);
        register_key(&PARTITION_PARALLEL);
    });
}
