//! Stats recording interface for event consumers.

use std::collections::HashMap;
use std::io;

use serde::{Deserialize, Serialize};

/// Point-in-time stats for one container.
///
/// Uses standard library types so recorders can persist it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Container id.
    pub container_id: String,
    /// Host the container runs on.
    pub host: String,
    /// Lifecycle state, e.g. `ACTIVE`.
    pub state: String,
    /// Memory allocated to the container, in megabytes.
    pub memory_mb: u32,
    /// Number of physical operators deployed in the container.
    pub num_operators: u32,
}

/// Point-in-time stats for one physical operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorStats {
    /// Logical operator name.
    pub name: String,
    /// Physical operator id.
    pub operator_id: i32,
    /// Hosting container id.
    pub container_id: String,
    /// Lifecycle status, e.g. `ACTIVE`.
    pub status: String,
    /// Total tuples processed since start.
    pub tuples_processed: u64,
    /// Total tuples emitted since start.
    pub tuples_emitted: u64,
    /// Moving-average end-to-end latency, in milliseconds.
    pub latency_ms: u64,
}

/// Sink for periodic container and operator stats.
///
/// Implementations typically append to the stats store under the
/// application path; both calls surface I/O failures to the caller.
pub trait StatsRecorder {
    /// Records a snapshot of all known containers.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the underlying store.
    fn record_containers(
        &mut self,
        containers: &HashMap<String, ContainerStats>,
        timestamp_ms: i64,
    ) -> io::Result<()>;

    /// Records a snapshot of all known operators.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the underlying store.
    fn record_operators(
        &mut self,
        operators: &[OperatorStats],
        timestamp_ms: i64,
    ) -> io::Result<()>;
}
