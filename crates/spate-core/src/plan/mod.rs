//! # Logical Plan
//!
//! The in-memory declarative representation of a dataflow application: a
//! directed graph of stateful operators connected by streams, together
//! with its structural validator.
//!
//! ## Overview
//!
//! - **[`LogicalPlan`]**: owns operators, streams, roots, and plan
//!   attributes; all wiring goes through it
//! - **[`OperatorMeta`]** / **[`StreamMeta`]**: per-node and per-edge
//!   metadata with insertion-ordered adjacency
//! - **[`OperatorDescriptor`]**: explicit port/capability declaration
//!   supplied by the operator author
//! - **[`LogicalPlan::validate`]**: cycle detection, connectivity,
//!   thread-local fan-in, delivery-semantics propagation, constraint
//!   checks, metric-aggregator inference
//! - **[`StorageAgent`]** / **[`OperatorRegistry`]**: pluggable operator
//!   persistence behind plan serialization
//!
//! ## Key Design Principles
//!
//! 1. **Failed calls have no effect** - builders validate before mutating
//! 2. **Insertion order everywhere** - identical build sequences produce
//!    identical serialized plans
//! 3. **Keys, not object graphs** - ports and streams cross-reference by
//!    operator name, port name, and stream id
//!
//! ## Example
//!
//! ```rust,ignore
//! use spate_core::plan::{Locality, LogicalPlan};
//!
//! let mut plan = LogicalPlan::new();
//! plan.add_operator("ingest", Box::new(Ingest::default()))?;
//! plan.add_operator("parse", Box::new(Parse::default()))?;
//! plan.add_operator("store", Box::new(Store::default()))?;
//! plan.connect("raw", ("ingest", "out"), [("parse", "in")])?;
//! plan.connect("parsed", ("parse", "out"), [("store", "in")])?;
//! plan.set_stream_locality("parsed", Some(Locality::ContainerLocal))?;
//! plan.validate()?;
//! ```

pub mod constraint;
pub mod context;
pub mod error;
pub mod logical;
pub mod metrics;
pub mod operator;
pub mod ports;
pub mod serialize;
pub mod stream;

#[cfg(test)]
mod tests;

// Re-export key types
pub use constraint::{ConstraintChecker, ConstraintViolation, NoopConstraintChecker};
pub use error::PlanError;
pub use logical::LogicalPlan;
pub use metrics::{
    DefaultMetricsAggregator, DimensionsScheme, MetricAggregatorMeta, MetricKind, MetricValue,
    MetricsAggregator, SumAggregator,
};
pub use operator::{
    DefaultUnifier, MetricSpec, Operator, OperatorDescriptor, OperatorDescriptorBuilder,
    OperatorMeta, Partitioner, ProcessingMode, Slider, UnifierFactory,
};
pub use ports::{InputPortMeta, OutputPortMeta, PortRef};
pub use serialize::{
    FsStorageAgent, OperatorFactory, OperatorRegistry, StorageAgent, LAUNCH_CONFIG_FILE_NAME,
    SER_FILE_NAME, SUBDIR_CHECKPOINTS, SUBDIR_EVENTS, SUBDIR_STATS,
};
pub use stream::{Locality, StreamMeta};
