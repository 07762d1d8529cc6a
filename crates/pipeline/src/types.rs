//! Shared value types for the Caravan pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. a retry policy always allows at
//! least one attempt, backoff growth is monotonic and capped) and participate
//! in domain computations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{FieldPath, SessionId, UnitId};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded exponential-backoff schedule for one unit's produce/validate loop.
///
/// Invariants, enforced at construction: `max_attempts >= 1`,
/// `backoff_multiplier >= 1.0` and finite, so the delay series is monotonic
/// non-decreasing; every delay is capped at `max_delay`.
///
/// Serialised form uses whole/fractional seconds (`initial_delay_secs`,
/// `max_delay_secs`) so descriptor files stay readable. Deserialisation goes
/// through [`RetryPolicy::new`], so a descriptor carrying an invariant-breaking
/// retry block fails to parse instead of producing a policy with zero attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyRepr")]
pub struct RetryPolicy {
    /// Total number of producer invocations allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(rename = "initial_delay_secs", with = "duration_secs")]
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_secs", with = "duration_secs")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a [`RetryPolicy`], returning `None` if any invariant is violated.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Option<Self> {
        if max_attempts >= 1 && backoff_multiplier.is_finite() && backoff_multiplier >= 1.0 {
            Some(Self {
                max_attempts,
                initial_delay,
                backoff_multiplier,
                max_delay,
            })
        } else {
            None
        }
    }

    /// Returns the delay to wait after failed attempt number `attempt`
    /// (1-based): `min(initial × multiplier^(attempt−1), max)`.
    pub fn delay_before_retry(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 2s initial delay, doubling, capped at 60s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Unvalidated wire form of [`RetryPolicy`]; conversion applies the
/// constructor's invariants.
#[derive(Deserialize)]
struct RetryPolicyRepr {
    max_attempts: u32,
    #[serde(rename = "initial_delay_secs", with = "duration_secs")]
    initial_delay: Duration,
    backoff_multiplier: f64,
    #[serde(rename = "max_delay_secs", with = "duration_secs")]
    max_delay: Duration,
}

impl TryFrom<RetryPolicyRepr> for RetryPolicy {
    type Error = String;

    fn try_from(repr: RetryPolicyRepr) -> Result<Self, Self::Error> {
        RetryPolicy::new(
            repr.max_attempts,
            repr.initial_delay,
            repr.backoff_multiplier,
            repr.max_delay,
        )
        .ok_or_else(|| {
            "retry policy requires max_attempts >= 1 and a finite backoff_multiplier >= 1.0"
                .to_string()
        })
    }
}

mod duration_secs {
    //! Serialises a [`Duration`] as (possibly fractional) seconds.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if secs.is_finite() && secs >= 0.0 {
            Ok(Duration::from_secs_f64(secs))
        } else {
            Err(serde::de::Error::custom("delay seconds must be finite and non-negative"))
        }
    }
}

// ---------------------------------------------------------------------------
// Unit descriptor
// ---------------------------------------------------------------------------

/// Static metadata for one unit, read from its descriptor file.
///
/// `config` is opaque unit-specific configuration passed through to the
/// producer untouched; the core never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    /// Unique id of the unit within a registry snapshot.
    pub id: UnitId,

    /// Human-readable unit name, used in logs and reports.
    pub name: String,

    /// Ids of the units whose outputs this unit consumes.
    #[serde(default)]
    pub dependencies: Vec<UnitId>,

    /// Disabled units are excluded from the graph entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// A critical unit aborts the remaining plan on failure; a non-critical
    /// one records a `failed` status and the run continues.
    #[serde(default = "default_true")]
    pub critical: bool,

    /// Per-unit override of the scheduler's default retry policy.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    /// Opaque producer configuration, ignored by the core.
    #[serde(default)]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Validation results
// ---------------------------------------------------------------------------

/// One blocking violation found in a produced payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationViolation {
    /// Path to the offending field within the payload.
    pub field: FieldPath,
    /// Human-readable description of the violation.
    pub message: String,
}

impl std::fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The full accounting of one validation pass over one payload.
///
/// A report lists *every* violation found, never just the first; callers rely
/// on seeing the complete picture before deciding to retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Blocking violations. Empty means the payload is valid.
    pub errors: Vec<ValidationViolation>,
    /// Non-blocking findings, surfaced in logs but never failing the payload.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if no blocking violation was found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Appends all findings of `other` to this report.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// One failed attempt inside the gate's retry loop, kept for the terminal
/// error's per-attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Violations reported by the validator, if the producer returned a payload.
    pub violations: Vec<ValidationViolation>,
    /// Transient producer error message, if the producer call itself failed.
    pub producer_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Output records
// ---------------------------------------------------------------------------

/// Terminal status of one unit within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// The unit produced a validated payload.
    Success,
    /// A non-critical unit failed; the run continued without its output.
    Failed,
    /// Cancellation landed mid-attempt; a later resume retries this unit.
    Interrupted,
    /// A prior session already completed this unit; nothing was re-executed.
    Skipped,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitStatus::Success => "success",
            UnitStatus::Failed => "failed",
            UnitStatus::Interrupted => "interrupted",
            UnitStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// The persisted outcome of one unit for one session.
///
/// A `Success` record carries the validated payload and is written exactly
/// once; it is never overwritten with invalid content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutputRecord {
    /// The unit this record belongs to.
    pub unit_id: UnitId,
    /// The session this record belongs to.
    pub session_id: SessionId,
    /// The validated payload (`Value::Null` for non-success records).
    pub payload: Value,
    /// Terminal status of the unit in this session.
    pub status: UnitStatus,
    /// Number of producer invocations spent.
    pub attempt_count: u32,
    /// When the record was created.
    pub completed_at: Timestamp,
}

impl UnitOutputRecord {
    /// Creates a `Success` record for a validated payload.
    pub fn success(unit_id: UnitId, session_id: SessionId, payload: Value, attempts: u32) -> Self {
        Self {
            unit_id,
            session_id,
            payload,
            status: UnitStatus::Success,
            attempt_count: attempts,
            completed_at: Timestamp::now(),
        }
    }

    /// Creates a payload-less record with the given non-success status.
    pub fn terminal(unit_id: UnitId, session_id: SessionId, status: UnitStatus, attempts: u32) -> Self {
        Self {
            unit_id,
            session_id,
            payload: Value::Null,
            status,
            attempt_count: attempts,
            completed_at: Timestamp::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Structured progress event emitted by the scheduler to its configured sink.
///
/// The sink's rendering (console, queue, websocket) is outside the core; the
/// scheduler also mirrors every event as a `tracing` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The unit's first attempt is about to start.
    UnitStarted {
        /// Unit being executed.
        unit_id: UnitId,
        /// Descriptor name, for human-readable sinks.
        name: String,
    },
    /// An attempt failed and the gate is waiting out a backoff delay.
    UnitRetrying {
        /// Unit being retried.
        unit_id: UnitId,
        /// The attempt that just failed (1-based).
        attempt: u32,
        /// Delay before the next attempt, in milliseconds.
        delay_ms: u64,
    },
    /// The unit produced a validated payload.
    UnitSucceeded {
        /// Unit that completed.
        unit_id: UnitId,
        /// Total attempts spent.
        attempts: u32,
    },
    /// The unit failed terminally (exhausted retries, fatal producer error,
    /// or unavailable dependency).
    UnitFailed {
        /// Unit that failed.
        unit_id: UnitId,
        /// Rendered error, including the full violation trail.
        error: String,
    },
    /// A prior session's record satisfied this unit; it was not re-executed.
    UnitSkipped {
        /// Unit that was skipped.
        unit_id: UnitId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_rejects_bad_invariants() {
        let d = Duration::from_secs(1);
        assert!(RetryPolicy::new(0, d, 2.0, d).is_none());
        assert!(RetryPolicy::new(3, d, 0.5, d).is_none());
        assert!(RetryPolicy::new(3, d, f64::NAN, d).is_none());
        assert!(RetryPolicy::new(1, d, 1.0, d).is_some());
    }

    #[test]
    fn retry_policy_backoff_series_is_exponential_and_capped() {
        let p = RetryPolicy::new(
            5,
            Duration::from_secs(2),
            2.0,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(p.delay_before_retry(1), Duration::from_secs(2));
        assert_eq!(p.delay_before_retry(2), Duration::from_secs(4));
        // 8s exceeds the cap.
        assert_eq!(p.delay_before_retry(3), Duration::from_secs(5));
        assert_eq!(p.delay_before_retry(4), Duration::from_secs(5));
    }

    #[test]
    fn retry_policy_growth_is_monotonic() {
        let p = RetryPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 1..=10 {
            let d = p.delay_before_retry(attempt);
            assert!(d >= last);
            assert!(d <= p.max_delay);
            last = d;
        }
    }

    #[test]
    fn descriptor_defaults_apply() {
        let desc: UnitDescriptor = serde_json::from_str(
            r#"{ "id": "4.5", "name": "culture-weave" }"#,
        )
        .unwrap();
        assert_eq!(desc.id, UnitId::new(4, 5));
        assert!(desc.enabled);
        assert!(desc.critical);
        assert!(desc.dependencies.is_empty());
        assert!(desc.retry.is_none());
        assert_eq!(desc.config, Value::Null);
    }

    #[test]
    fn retry_policy_round_trips_through_descriptor_json() {
        let json = r#"{
            "id": "2",
            "name": "geo",
            "retry": { "max_attempts": 4, "initial_delay_secs": 1.5,
                       "backoff_multiplier": 3.0, "max_delay_secs": 30 }
        }"#;
        let desc: UnitDescriptor = serde_json::from_str(json).unwrap();
        let retry = desc.retry.unwrap();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(1500));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn retry_policy_invariants_hold_on_deserialization_too() {
        // A policy that can never invoke the producer must not parse.
        let zero_attempts = r#"{
            "id": "2",
            "name": "geo",
            "retry": { "max_attempts": 0, "initial_delay_secs": 1.0,
                       "backoff_multiplier": 2.0, "max_delay_secs": 10 }
        }"#;
        assert!(serde_json::from_str::<UnitDescriptor>(zero_attempts).is_err());

        let shrinking_backoff = r#"{ "max_attempts": 3, "initial_delay_secs": 1.0,
                                     "backoff_multiplier": 0.5, "max_delay_secs": 10 }"#;
        assert!(serde_json::from_str::<RetryPolicy>(shrinking_backoff).is_err());
    }

    #[test]
    fn validation_report_is_full_accounting() {
        let mut report = ValidationReport::default();
        assert!(report.is_valid());
        report.errors.push(ValidationViolation {
            field: FieldPath::new("name"),
            message: "too short".into(),
        });
        let mut other = ValidationReport::default();
        other.warnings.push("dubious".into());
        report.merge(other);
        assert!(!report.is_valid());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }
}
