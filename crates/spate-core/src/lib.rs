//! # Spate Core
//!
//! The logical plan core for the Spate streaming engine.
//!
//! This crate provides:
//! - **Attributes**: Typed configuration keys with scoped lookup
//! - **Logical Plan**: Operators, ports, and streams wired into a dataflow graph
//! - **Validator**: Structural validation (cycles, connectivity, delivery semantics)
//! - **Events**: Lifecycle events emitted by the engine control plane
//!
//! ## Design Principles
//!
//! 1. **Validate before mutate** - A failed builder call leaves the plan untouched
//! 2. **Deterministic** - Identical build sequences serialize byte-identically
//! 3. **Capabilities over frameworks** - Constraint checking, storage, and
//!    metric aggregation are pluggable trait seams
//!
//! ## Example
//!
//! ```rust,ignore
//! use spate_core::plan::LogicalPlan;
//!
//! let mut plan = LogicalPlan::new();
//! plan.add_operator("numbers", Box::new(NumberSource::default()))?;
//! plan.add_operator("sum", Box::new(SumOperator::default()))?;
//! plan.connect("s1", ("numbers", "out"), [("sum", "in")])?;
//! plan.validate()?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attr;
pub mod event;
pub mod plan;

/// Result type for spate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for spate-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Attribute system errors
    #[error("Attribute error: {0}")]
    Attr(#[from] attr::AttrError),

    /// Logical plan errors
    #[error("Plan error: {0}")]
    Plan(#[from] plan::PlanError),
}
