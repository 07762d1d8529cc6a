//! The bounded-backoff retry executor.
//!
//! Wraps one unit's `invoke producer → validate payload` sequence. A failed
//! validation or a transient producer error schedules another attempt after
//! `min(initial × multiplier^(attempt−1), max)`; a fatal producer error
//! propagates immediately regardless of remaining attempts. Once the policy
//! is exhausted the gate raises [`PipelineError::ValidationExhausted`]
//! carrying the complete per-attempt violation history — a fallback value is
//! never substituted for validated content.
//!
//! Producers must be free of side-effects on failed attempts; the gate
//! re-invokes them assuming a retry starts from a clean slate.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pipeline::{
    AttemptFailure, PipelineError, Producer, ProducerError, ProducerInputs, ProgressEvent,
    ProgressSink, RetryPolicy, SessionId, UnitId, ValidationReport,
};

use crate::validator::ContentValidator;

// ---------------------------------------------------------------------------

/// The gate's terminal success: a validated payload and how much it cost to
/// get there.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    /// The payload that passed validation.
    pub payload: serde_json::Value,
    /// Producer invocations spent, including the successful one.
    pub attempts: u32,
    /// Non-blocking findings from the successful attempt's validation pass.
    pub warnings: Vec<String>,
}

/// Executes one unit's produce/validate loop under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryGate {
    policy: RetryPolicy,
    validator: ContentValidator,
}

impl RetryGate {
    /// Creates a gate with the given policy and validator.
    pub fn new(policy: RetryPolicy, validator: ContentValidator) -> Self {
        Self { policy, validator }
    }

    /// Runs `producer` for `unit` until a payload passes validation or the
    /// policy is exhausted.
    ///
    /// A `UnitRetrying` event is delivered to `sink` the moment each backoff
    /// begins, so observers see retries as they happen even when the gate
    /// ultimately fails. Cancellation via `cancel` aborts promptly — both
    /// mid-call and mid-delay — with [`PipelineError::Interrupted`].
    pub async fn execute(
        &self,
        unit: UnitId,
        session: SessionId,
        producer: &dyn Producer,
        inputs: &ProducerInputs,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<GateOutcome, PipelineError> {
        let mut history: Vec<AttemptFailure> = Vec::new();

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(PipelineError::Interrupted { unit, attempts: attempt - 1 });
            }

            let produced = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PipelineError::Interrupted { unit, attempts: attempt - 1 })
                }
                result = producer.run(session, inputs) => result,
            };

            let failure = match produced {
                Ok(payload) => {
                    let report = self.validator.validate(&payload);
                    if report.is_valid() {
                        info!(%unit, %session, attempt, "payload passed validation");
                        return Ok(GateOutcome {
                            payload,
                            attempts: attempt,
                            warnings: report.warnings,
                        });
                    }
                    self.log_invalid(unit, session, attempt, &report);
                    AttemptFailure {
                        attempt,
                        violations: report.errors,
                        producer_error: None,
                    }
                }
                Err(ProducerError::Fatal { message }) => {
                    return Err(PipelineError::Producer {
                        unit,
                        source: ProducerError::Fatal { message },
                    });
                }
                Err(ProducerError::Transient { message }) => {
                    warn!(%unit, %session, attempt, error = %message, "transient producer failure");
                    AttemptFailure {
                        attempt,
                        violations: Vec::new(),
                        producer_error: Some(message),
                    }
                }
            };
            history.push(failure);

            if attempt < self.policy.max_attempts {
                let delay = self.policy.delay_before_retry(attempt);
                warn!(
                    %unit, %session, attempt,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed; backing off before retry",
                );
                sink.emit(
                    session,
                    ProgressEvent::UnitRetrying {
                        unit_id: unit,
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    },
                )
                .await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(PipelineError::Interrupted { unit, attempts: attempt })
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(PipelineError::ValidationExhausted {
            unit,
            attempts: self.policy.max_attempts,
            history,
        })
    }

    fn log_invalid(&self, unit: UnitId, session: SessionId, attempt: u32, report: &ValidationReport) {
        let violations: Vec<String> = report.errors.iter().map(|v| v.to_string()).collect();
        warn!(
            %unit, %session, attempt,
            violation_count = violations.len(),
            violations = ?violations,
            "payload failed validation",
        );
    }
}
