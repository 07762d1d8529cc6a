//! Error taxonomy for the Caravan pipeline domain.
//!
//! [`PipelineError`] covers conditions that halt or escalate the run itself.
//! The taxonomy is deliberately explicit about *when* an error can occur:
//! configuration variants are raised at plan-build time before any unit
//! executes; the remaining variants are raised per unit during execution.
//!
//! A terminal validation failure always carries the complete per-attempt
//! violation history — the system never substitutes a default or fallback
//! value in place of validated content.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AttemptFailure, SessionId, UnitId};

// ---------------------------------------------------------------------------
// Producer-level errors
// ---------------------------------------------------------------------------

/// Error returned by a unit's producer.
///
/// The split drives the gate's retry decision: `Transient` failures are
/// retried under the same policy as validation failures; `Fatal` failures
/// propagate immediately regardless of remaining attempts.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProducerError {
    /// The call may succeed if re-invoked (timeout, rate limit, 5xx).
    #[error("transient producer failure: {message}")]
    Transient {
        /// Description of the transient condition.
        message: String,
    },

    /// Retrying cannot help (bad credentials, malformed unit configuration).
    #[error("fatal producer failure: {message}")]
    Fatal {
        /// Description of the fatal condition.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Store-level errors
// ---------------------------------------------------------------------------

/// Error returned by a state store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached or returned a failure status.
    #[error("state store transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A stored record could not be decoded.
    #[error("state store returned an undecodable record: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that halt a unit or the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Two descriptor sources declare the same unit id.
    ///
    /// Raised at registry-build time; both sources are named so the operator
    /// can tell which file to fix.
    #[error("duplicate unit id {id}: declared by both '{first_source}' and '{second_source}'")]
    DuplicateUnitId {
        /// The id declared twice.
        id: UnitId,
        /// Source (file name) of the first declaration.
        first_source: String,
        /// Source (file name) of the second declaration.
        second_source: String,
    },

    /// A descriptor could not be parsed (bad JSON, malformed id or
    /// dependency list, filename/id mismatch).
    #[error("malformed descriptor '{file}': {message}")]
    MalformedDescriptor {
        /// File name of the offending descriptor.
        file: String,
        /// Description of what failed to parse.
        message: String,
    },

    /// The descriptor location could not be scanned or a descriptor file
    /// could not be read.
    #[error("descriptor discovery failed at '{path}': {message}")]
    DescriptorIo {
        /// Directory or file that failed to read.
        path: String,
        /// Description of the I/O failure.
        message: String,
    },

    /// The dependency graph contains at least one cycle.
    ///
    /// `members` holds every unit left unordered by the topological sort,
    /// i.e. all units participating in (or downstream-locked behind) a cycle
    /// — not just one edge. No partial plan is emitted.
    #[error("dependency cycle involving units [{}]", format_ids(.members))]
    DependencyCycle {
        /// All units that could not be ordered, ascending.
        members: Vec<UnitId>,
    },

    /// An enabled unit depends on a unit that no descriptor declares.
    #[error("unit {unit} depends on unknown unit {dependency}")]
    UnknownDependency {
        /// The declaring unit.
        unit: UnitId,
        /// The missing dependency id.
        dependency: UnitId,
    },

    /// An enabled unit depends on a disabled unit; the dependency can never
    /// be satisfied, so this is a configuration error rather than a skip.
    #[error("unit {unit} depends on disabled unit {dependency}")]
    DisabledDependency {
        /// The declaring unit.
        unit: UnitId,
        /// The disabled dependency id.
        dependency: UnitId,
    },

    /// A predecessor's output was missing at execution time despite correct
    /// plan ordering (e.g. the predecessor was non-critical and failed).
    #[error("unit {unit} is missing the output of dependency {dependency} in session {session}")]
    UnavailableDependency {
        /// The unit that could not run.
        unit: UnitId,
        /// The dependency whose output is absent.
        dependency: UnitId,
        /// The session being executed.
        session: SessionId,
    },

    /// The gate exhausted every attempt without a valid payload.
    ///
    /// `history` is the complete per-attempt violation trail.
    #[error("unit {unit} exhausted {attempts} attempt(s) without a valid payload")]
    ValidationExhausted {
        /// The unit that failed.
        unit: UnitId,
        /// Attempts spent (equals the policy's `max_attempts`).
        attempts: u32,
        /// Every failed attempt, in order, with its full violation list.
        history: Vec<AttemptFailure>,
    },

    /// The producer failed fatally; no retry was attempted.
    #[error("unit {unit}: {source}")]
    Producer {
        /// The unit whose producer failed.
        unit: UnitId,
        /// The underlying producer error.
        source: ProducerError,
    },

    /// The state store failed while reading or writing a record.
    #[error("unit {unit}: {source}")]
    Store {
        /// The unit whose record was being accessed.
        unit: UnitId,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// The session was cancelled while this unit was mid-attempt or
    /// mid-delay. A later resume retries the unit.
    #[error("unit {unit} interrupted by session cancellation after {attempts} attempt(s)")]
    Interrupted {
        /// The unit that was in flight when cancellation landed.
        unit: UnitId,
        /// Attempts fully completed before cancellation.
        attempts: u32,
    },

    /// The requested start unit is not part of the computed plan.
    #[error("requested start unit {unit} is not in the computed plan")]
    UnknownStartUnit {
        /// The unit the caller asked to start from.
        unit: UnitId,
    },
}

impl PipelineError {
    /// Returns `true` for configuration errors, which are raised at
    /// plan-build time before any unit executes.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::DuplicateUnitId { .. }
                | PipelineError::MalformedDescriptor { .. }
                | PipelineError::DescriptorIo { .. }
                | PipelineError::DependencyCycle { .. }
                | PipelineError::UnknownDependency { .. }
                | PipelineError::DisabledDependency { .. }
        )
    }

    /// Returns the unit the error is attributed to, when there is one.
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            PipelineError::DuplicateUnitId { id, .. } => Some(*id),
            PipelineError::UnknownDependency { unit, .. }
            | PipelineError::DisabledDependency { unit, .. }
            | PipelineError::UnavailableDependency { unit, .. }
            | PipelineError::ValidationExhausted { unit, .. }
            | PipelineError::Producer { unit, .. }
            | PipelineError::Store { unit, .. }
            | PipelineError::Interrupted { unit, .. }
            | PipelineError::UnknownStartUnit { unit } => Some(*unit),
            PipelineError::MalformedDescriptor { .. }
            | PipelineError::DescriptorIo { .. }
            | PipelineError::DependencyCycle { .. } => None,
        }
    }

    /// Renders the error with its full trail (attempt history for
    /// [`PipelineError::ValidationExhausted`]) for reports and logs.
    pub fn full_trail(&self) -> String {
        match self {
            PipelineError::ValidationExhausted { history, .. } => {
                let mut out = self.to_string();
                for failure in history {
                    out.push_str(&format!("\n  attempt {}:", failure.attempt));
                    if let Some(msg) = &failure.producer_error {
                        out.push_str(&format!(" producer error: {msg}"));
                    }
                    for v in &failure.violations {
                        out.push_str(&format!("\n    - {v}"));
                    }
                }
                out
            }
            other => other.to_string(),
        }
    }
}

fn format_ids(ids: &[UnitId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
