//! Engine lifecycle events.
//!
//! A closed family of events reported by the engine control plane to
//! outside consumers. Every event shares one header: a strictly
//! increasing id from a process-global counter, a millisecond timestamp,
//! a log level, and an optional human-readable reason. The variant lives
//! in [`EventKind`]; consumers pattern-match on it rather than
//! dispatching dynamically.
//!
//! Events may be created from multiple threads; the id counter is the
//! only shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub mod recorder;


pub use recorder::{ContainerStats, OperatorStats, StatsRecorder};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Moves the event id counter forward so the next id is at least
/// `next_id`. Called after deserializing recorded events to keep ids
/// strictly increasing across restarts.
pub fn seed_event_ids(next_id: u64) {
    NEXT_EVENT_ID.fetch_max(next_id, Ordering::SeqCst);
}

#[allow(clippy::cast_possible_truncation)] // millis since epoch fit i64 for eons
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Severity attached to an event for downstream log sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EventLogLevel {
    /// Finest-grained diagnostics.
    Trace,
    /// Debug diagnostics.
    Debug,
    /// Routine lifecycle information.
    Info,
    /// Unexpected but tolerated conditions.
    Warn,
    /// Failures needing attention.
    Error,
    /// Unrecoverable failures.
    Fatal,
}

/// A request to mutate the logical plan at runtime, carried by
/// [`EventKind::ChangeLogicalPlan`]. The actual request types live with
/// the plan-change subsystem; this is the declarative boundary form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanChangeRequest {
    /// Request kind, e.g. `CreateOperator`.
    pub kind: String,
    /// Request arguments as `(name, value)` pairs.
    pub properties: Vec<(String, String)>,
}

/// The variant payload of an engine event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    /// A property was set on a logical operator.
    SetOperatorProperty {
        /// Logical operator name.
        operator_name: String,
        /// Property name.
        property_name: String,
        /// New property value.
        property_value: String,
    },
    /// An operator was repartitioned.
    Partition {
        /// Logical operator name.
        operator_name: String,
        /// Partition count before the change.
        old_partition_count: u32,
        /// Partition count after the change.
        new_partition_count: u32,
    },
    /// A physical operator was created.
    CreateOperator {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
    },
    /// A physical operator was removed.
    RemoveOperator {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
    },
    /// A physical operator started in a container.
    StartOperator {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
        /// Hosting container id.
        container_id: String,
        /// Failure-chain id this start belongs to, zero if none.
        failure_id: u64,
    },
    /// A physical operator stopped.
    StopOperator {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
        /// Hosting container id.
        container_id: String,
        /// Failure-chain id this stop belongs to, zero if none.
        failure_id: u64,
    },
    /// A property was set on a physical operator.
    SetPhysicalOperatorProperty {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
        /// Property name.
        property_name: String,
        /// New property value.
        property_value: String,
    },
    /// A container started on a node.
    StartContainer {
        /// Container id.
        container_id: String,
        /// Node the container runs on.
        container_node_id: String,
    },
    /// A container stopped.
    StopContainer {
        /// Container id.
        container_id: String,
        /// Process exit status.
        exit_status: i32,
        /// Failure-chain id this stop belongs to, zero if none.
        failure_id: u64,
    },
    /// A logical plan change was requested.
    ChangeLogicalPlan {
        /// The requested change.
        request: PlanChangeRequest,
    },
    /// A physical operator failed.
    OperatorError {
        /// Logical operator name.
        operator_name: String,
        /// Physical operator id.
        operator_id: i32,
        /// Hosting container id.
        container_id: String,
        /// Failure description.
        error_message: String,
        /// Failure-chain id, zero if none.
        failure_id: u64,
    },
    /// A container failed.
    ContainerError {
        /// Container id.
        container_id: String,
        /// Failure description.
        error_message: String,
    },
}

impl EventKind {
    /// The stable type tag consumers key on.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SetOperatorProperty { .. } => "SetOperatorProperty",
            Self::Partition { .. } => "Partition",
            Self::CreateOperator { .. } => "CreateOperator",
            Self::RemoveOperator { .. } => "RemoveOperator",
            Self::StartOperator { .. } => "StartOperator",
            Self::StopOperator { .. } => "StopOperator",
            Self::SetPhysicalOperatorProperty { .. } => "SetPhysicalOperatorProperty",
            Self::StartContainer { .. } => "StartContainer",
            Self::StopContainer { .. } => "StopContainer",
            Self::ChangeLogicalPlan { .. } => "ChangeLogicalPlan",
            Self::OperatorError { .. } => "OperatorError",
            Self::ContainerError { .. } => "ContainerError",
        }
    }

    /// The log level an event of this kind defaults to. Operator stops
    /// warn; errors are errors; everything else is routine lifecycle.
    #[must_use]
    pub fn default_log_level(&self) -> EventLogLevel {
        match self {
            Self::StopOperator { .. } => EventLogLevel::Warn,
            Self::OperatorError { .. } | Self::ContainerError { .. } => EventLogLevel::Error,
            _ => EventLogLevel::Info,
        }
    }
}

/// One engine event: shared header plus variant payload.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    id: u64,
    timestamp_ms: i64,
    level: EventLogLevel,
    reason: Option<String>,
    kind: EventKind,
}

impl EngineEvent {
    /// Creates an event with the kind's default log level, a fresh id,
    /// and the current wall-clock timestamp.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        let level = kind.default_log_level();
        Self::with_level(kind, level)
    }

    /// Creates an event with an explicit log level.
    #[must_use]
    pub fn with_level(kind: EventKind, level: EventLogLevel) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: now_millis(),
            level,
            reason: None,
            kind,
        }
    }

    /// The event's strictly increasing id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Milliseconds since the Unix epoch at creation, unless overridden.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Overrides the event timestamp.
    pub fn set_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }

    /// The event's log level.
    #[must_use]
    pub fn level(&self) -> EventLogLevel {
        self.level
    }

    /// The human-readable reason, if one was attached.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Attaches a human-readable reason.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// The variant payload.
    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The stable type tag of the variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}
