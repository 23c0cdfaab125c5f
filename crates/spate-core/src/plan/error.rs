//! Error types for logical plan construction and validation.

use crate::attr::AttrError;
use crate::plan::constraint::ConstraintViolation;
use crate::plan::operator::ProcessingMode;
use crate::plan::ports::PortRef;

fn fmt_violations(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while building, validating, or serializing a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// An operator with the same name already exists.
    #[error("duplicate operator name: {0}")]
    DuplicateOperator(String),

    /// A stream with the same id already exists.
    #[error("duplicate stream id: {0}")]
    DuplicateStream(String),

    /// Two ports on the same operator share a name.
    #[error("port name {port} duplicated on operator {operator}")]
    DuplicatePortName {
        /// Operator declaring the ports.
        operator: String,
        /// The duplicated port name.
        port: String,
    },

    /// A named operator does not exist in the plan.
    #[error("operator not found: {0}")]
    OperatorNotFound(String),

    /// A stream id does not exist in the plan.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// A port reference does not resolve to a declared port.
    #[error("port not found: {0}")]
    PortNotFound(PortRef),

    /// The output port is already the source of another stream.
    #[error("operator {operator} already connected to {stream} on output port {port}")]
    OutputAlreadyConnected {
        /// Operator owning the port.
        operator: String,
        /// The contested output port.
        port: String,
        /// Stream the port is already attached to.
        stream: String,
    },

    /// The input port is already a sink of another stream.
    #[error("port {port} of operator {operator} already connected to stream {stream}")]
    InputAlreadyConnected {
        /// Operator owning the port.
        operator: String,
        /// The contested input port.
        port: String,
        /// Stream the port is already attached to.
        stream: String,
    },

    /// Field-level constraints failed on an operator.
    #[error("operator {operator} violates constraints: {}", fmt_violations(.violations))]
    ConstraintViolations {
        /// The offending operator.
        operator: String,
        /// All violations reported for the operator.
        violations: Vec<ConstraintViolation>,
    },

    /// A parallel-partition attribute is set on a non-partitionable operator.
    #[error("operator {operator} is not partitionable but the parallel partition attribute is set on input port {port}")]
    ParallelPartitionNotAllowed {
        /// The non-partitionable operator.
        operator: String,
        /// Input port carrying the attribute.
        port: String,
    },

    /// A non-partitionable operator provides partitioning capabilities.
    #[error("operator {0} provides partitioning capabilities but is declared non-partitionable")]
    PartitionerNotAllowed(String),

    /// Checkpoint window count does not align with the application window.
    #[error("operator {operator} cannot be checkpointed within an application window but checkpoint window count {checkpoint_window_count} is not a multiple of application window count {application_window_count}")]
    CheckpointWindowMismatch {
        /// The offending operator.
        operator: String,
        /// Configured checkpoint window count.
        checkpoint_window_count: u32,
        /// Configured application window count.
        application_window_count: u32,
    },

    /// A required input port has no stream attached.
    #[error("Input port connection required: {operator}.{port}")]
    InputPortConnectionRequired {
        /// Operator owning the port.
        operator: String,
        /// The unconnected input port.
        port: String,
    },

    /// A required output port has no stream attached.
    #[error("Output port connection required: {operator}.{port}")]
    OutputPortConnectionRequired {
        /// Operator owning the port.
        operator: String,
        /// The unconnected output port.
        port: String,
    },

    /// An operator with required output ports has no output streams at all.
    #[error("at least one output port must be connected: {0}")]
    OutputStreamRequired(String),

    /// The graph contains cycles; each inner list names one cycle.
    #[error("cycles in graph: {0:?}")]
    Cycles(Vec<Vec<String>>),

    /// A stream has no source or no sinks.
    #[error("stream not connected: {0}")]
    StreamDisconnected(String),

    /// A root operator does not support the input-operator capability.
    #[error("root operator {0} is not an input operator")]
    RootNotInputOperator(String),

    /// A multi-input operator mixes thread-local and remote input streams.
    #[error("thread-local locality invalid for operator {0}: not all input streams are thread-local")]
    OioLocalityMixed(String),

    /// Thread-local input streams originate from different pipeline roots.
    #[error("thread-local locality invalid for operator {0}: input streams originate from different thread-local roots")]
    OioRootDivergence(String),

    /// Downstream delivery semantics are incompatible with upstream.
    #[error("processing mode {downstream_mode:?} of operator {downstream} not valid for upstream operator {upstream} with mode {upstream_mode}")]
    ProcessingModeConflict {
        /// Upstream operator name.
        upstream: String,
        /// Upstream delivery mode.
        upstream_mode: ProcessingMode,
        /// Downstream operator name.
        downstream: String,
        /// Downstream delivery mode, if set.
        downstream_mode: Option<ProcessingMode>,
    },

    /// The application path attribute is required but unset.
    #[error("application path attribute is required")]
    ApplicationPathMissing,

    /// No factory is registered for an operator type tag.
    #[error("unknown operator type tag: {0}")]
    UnknownOperatorTag(String),

    /// The storage agent reported an I/O failure.
    #[error("storage agent error: {0}")]
    Storage(#[from] std::io::Error),

    /// The plan snapshot could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// An attribute failed to rebind on load.
    #[error(transparent)]
    Attr(#[from] AttrError),
}
