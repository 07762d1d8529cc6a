//! Retry-Validation Gate.
//!
//! The quality-control layer between a unit's producer and persistence. No
//! payload reaches the state store without passing content validation, and no
//! exhausted retry is ever papered over with a default or fallback value.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`validator`] | Recursive content validation against configurable rules |
//! | [`scoring`] | Range-checked weighted score aggregation |
//! | [`retry`] | The bounded-backoff produce/validate loop |

pub mod retry;
pub mod scoring;
pub mod validator;

pub use retry::{GateOutcome, RetryGate};
pub use scoring::{ScoreRange, ScoringAggregator, ScoringError, WeightedScore};
pub use validator::{ContentValidator, DenyPattern, DomainPredicate, ValidationRules};
