//! Core orchestration domain for Caravan.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, cross-cutting error type, port trait, and the dependency-graph
//! resolution logic used throughout the pipeline. Infrastructure crates
//! implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`UnitId`, `SessionId`, `FieldPath`) |
//! | [`types`] | Shared value types (`UnitDescriptor`, `RetryPolicy`, `UnitOutputRecord`, etc.) |
//! | [`errors`] | Error taxonomy (`PipelineError`, `ProducerError`, `StoreError`) |
//! | [`ports`] | Async port traits (`Producer`, `StateStore`, `ProgressSink`) |
//! | [`plan`] | Dependency graph, topological resolution, execution plans |

pub mod errors;
pub mod identifiers;
pub mod plan;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{PipelineError, ProducerError, StoreError};
pub use identifiers::{FieldPath, ParseUnitIdError, SessionId, UnitId};
pub use plan::{DependencyGraph, ExecutionPlan};
pub use ports::{NullProgressSink, Producer, ProducerInputs, ProgressSink, StateStore};
pub use types::{
    AttemptFailure, ProgressEvent, RetryPolicy, Timestamp, UnitDescriptor, UnitOutputRecord,
    UnitStatus, ValidationReport, ValidationViolation,
};
