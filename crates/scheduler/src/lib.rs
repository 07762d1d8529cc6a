//! Execution scheduler.
//!
//! Walks a resolved plan strictly in order for one session: consults the
//! state store for resumability, fetches each unit's declared dependency
//! payloads, invokes the unit through the retry-validation gate, and persists
//! the validated result. Most units in practice depend on the immediately
//! preceding unit's complete output, so the default scheduling model is
//! single-threaded and sequential; independent branches exposed by
//! [`pipeline::DependencyGraph::independent_branches`] are left to a future
//! concurrent extension.
//!
//! Failure policy per unit:
//!
//! - critical unit → no record is written, the remaining plan is aborted;
//! - non-critical unit → a `failed` record is written, the full error is
//!   logged, and the run continues;
//! - cancellation → an `interrupted` record is written so a later resume
//!   retries the unit instead of treating it as exhausted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use gate::{ContentValidator, RetryGate, ValidationRules};
use pipeline::{
    DependencyGraph, PipelineError, ProducerInputs, ProgressEvent, ProgressSink, RetryPolicy,
    SessionId, StateStore, UnitDescriptor, UnitId, UnitOutputRecord, UnitStatus,
};
use registry::UnitRegistry;

// ---------------------------------------------------------------------------
// Run reports
// ---------------------------------------------------------------------------

/// How the run as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every unit in the plan reached a terminal status.
    Completed,
    /// A critical unit failed; the units after it were not executed.
    Aborted {
        /// The unit whose failure aborted the run.
        unit: UnitId,
    },
    /// The session was cancelled mid-run.
    Interrupted {
        /// The unit that was in flight when cancellation landed.
        unit: UnitId,
    },
}

/// One row of the per-unit status table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    /// The unit this row describes.
    pub unit_id: UnitId,
    /// Descriptor name.
    pub name: String,
    /// Terminal status of the unit in this run.
    pub status: UnitStatus,
    /// Producer invocations spent (0 when nothing was invoked).
    pub attempts: u32,
    /// Full error trail for failed or interrupted units.
    pub error: Option<String>,
}

/// The caller-visible result of [`Scheduler::run`]: a per-unit status table
/// plus, for any failure, the complete validation/error trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The session the run executed under.
    pub session: SessionId,
    /// One entry per plan unit that reached a terminal status, in plan order.
    pub entries: Vec<RunEntry>,
    /// How the run ended.
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Returns `true` if every unit completed with `success` or `skipped`.
    pub fn all_succeeded(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self
                .entries
                .iter()
                .all(|e| matches!(e.status, UnitStatus::Success | UnitStatus::Skipped))
    }

    /// Returns the entry for `unit`, if it reached a terminal status.
    pub fn entry(&self, unit: UnitId) -> Option<&RunEntry> {
        self.entries.iter().find(|e| e.unit_id == unit)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "session {}", self.session)?;
        for entry in &self.entries {
            writeln!(
                f,
                "  {:>8}  {:<30} {:<12} attempts={}",
                entry.unit_id.to_string(),
                entry.name,
                entry.status.to_string(),
                entry.attempts,
            )?;
            if let Some(error) = &entry.error {
                for line in error.lines() {
                    writeln!(f, "            {line}")?;
                }
            }
        }
        match &self.outcome {
            RunOutcome::Completed => writeln!(f, "  outcome: completed"),
            RunOutcome::Aborted { unit } => writeln!(f, "  outcome: aborted at unit {unit}"),
            RunOutcome::Interrupted { unit } => {
                writeln!(f, "  outcome: interrupted at unit {unit}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives one session through the resolved plan.
pub struct Scheduler {
    registry: Arc<UnitRegistry>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn ProgressSink>,
    default_policy: RetryPolicy,
    rules: Arc<ValidationRules>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler with the stock deny-list, the default retry
    /// policy, and no progress sink beyond `tracing`.
    pub fn new(registry: Arc<UnitRegistry>, store: Arc<dyn StateStore>) -> Self {
        let rules = ValidationRules::new()
            .default_min_length(1)
            .deny_all(ValidationRules::default_deny_list());
        Self {
            registry,
            store,
            sink: Arc::new(pipeline::NullProgressSink),
            default_policy: RetryPolicy::default(),
            rules: Arc::new(rules),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the progress sink.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the default retry policy (descriptors may still override it
    /// per unit).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Replaces the validation rule set.
    pub fn with_validation_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// Returns a token that cancels the session when triggered. In-flight
    /// retries abort promptly; the affected unit is recorded `interrupted`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Executes the plan for `session`, resuming past units that already have
    /// a successful record.
    ///
    /// `start_at` forces execution to begin at the given unit: stored records
    /// for it and every unit after it are ignored (records *before* it still
    /// satisfy dependency fetches).
    pub async fn run(
        &self,
        session: SessionId,
        start_at: Option<UnitId>,
    ) -> Result<RunReport, PipelineError> {
        let span = info_span!("pipeline_run", %session);
        self.run_inner(session, start_at).instrument(span).await
    }

    /// Resumes `session` from the first unit without a successful record.
    pub async fn resume(&self, session: SessionId) -> Result<RunReport, PipelineError> {
        self.run(session, None).await
    }

    async fn run_inner(
        &self,
        session: SessionId,
        start_at: Option<UnitId>,
    ) -> Result<RunReport, PipelineError> {
        let descriptors = self.registry.plan_descriptors();
        let graph = DependencyGraph::from_descriptors(&descriptors)?;
        let plan = graph.resolve()?;
        let by_id: BTreeMap<UnitId, &UnitDescriptor> =
            descriptors.iter().map(|d| (d.id, d)).collect();

        let force_from = match start_at {
            None => None,
            Some(unit) => Some(
                plan.position(unit)
                    .ok_or(PipelineError::UnknownStartUnit { unit })?,
            ),
        };

        info!(units = plan.len(), ?start_at, "plan resolved");

        let mut entries = Vec::new();
        let mut outcome = RunOutcome::Completed;
        for (index, unit_id) in plan.iter().enumerate() {
            let Some(descriptor) = by_id.get(&unit_id) else {
                continue; // plan units always come from `descriptors`
            };
            let forced = force_from.is_some_and(|from| index >= from);

            if !forced && self.completed_in_store(session, unit_id).await? {
                info!(unit = %unit_id, "already complete; skipping");
                self.emit(session, ProgressEvent::UnitSkipped { unit_id }).await;
                entries.push(RunEntry {
                    unit_id,
                    name: descriptor.name.clone(),
                    status: UnitStatus::Skipped,
                    attempts: 0,
                    error: None,
                });
                continue;
            }

            match self.execute_unit(session, descriptor, &graph).await {
                Ok(attempts) => {
                    entries.push(RunEntry {
                        unit_id,
                        name: descriptor.name.clone(),
                        status: UnitStatus::Success,
                        attempts,
                        error: None,
                    });
                }
                Err(err @ PipelineError::Interrupted { .. }) => {
                    let attempts = interrupted_attempts(&err);
                    let record =
                        UnitOutputRecord::terminal(unit_id, session, UnitStatus::Interrupted, attempts);
                    self.persist(&record).await?;
                    self.emit(
                        session,
                        ProgressEvent::UnitFailed {
                            unit_id,
                            error: err.to_string(),
                        },
                    )
                    .await;
                    entries.push(RunEntry {
                        unit_id,
                        name: descriptor.name.clone(),
                        status: UnitStatus::Interrupted,
                        attempts,
                        error: Some(err.to_string()),
                    });
                    outcome = RunOutcome::Interrupted { unit: unit_id };
                    break;
                }
                Err(err) => {
                    let trail = err.full_trail();
                    error!(unit = %unit_id, critical = descriptor.critical, error = %trail, "unit failed");
                    self.emit(
                        session,
                        ProgressEvent::UnitFailed {
                            unit_id,
                            error: trail.clone(),
                        },
                    )
                    .await;
                    entries.push(RunEntry {
                        unit_id,
                        name: descriptor.name.clone(),
                        status: UnitStatus::Failed,
                        attempts: failed_attempts(&err),
                        error: Some(trail),
                    });
                    if descriptor.critical {
                        // No record for a critical failure: nothing invalid is
                        // persisted and a resume retries from here.
                        outcome = RunOutcome::Aborted { unit: unit_id };
                        break;
                    }
                    let record = UnitOutputRecord::terminal(
                        unit_id,
                        session,
                        UnitStatus::Failed,
                        failed_attempts(&err),
                    );
                    self.persist(&record).await?;
                }
            }
        }

        Ok(RunReport {
            session,
            entries,
            outcome,
        })
    }

    /// Runs one unit through the gate and persists its success record.
    /// Returns the attempts spent.
    async fn execute_unit(
        &self,
        session: SessionId,
        descriptor: &UnitDescriptor,
        graph: &DependencyGraph,
    ) -> Result<u32, PipelineError> {
        let unit_id = descriptor.id;
        let inputs = self.fetch_inputs(session, unit_id, graph).await?;
        let producer = self.registry.load_producer(unit_id)?;

        self.emit(
            session,
            ProgressEvent::UnitStarted {
                unit_id,
                name: descriptor.name.clone(),
            },
        )
        .await;
        info!(unit = %unit_id, name = %descriptor.name, "unit started");

        let policy = descriptor
            .retry
            .clone()
            .unwrap_or_else(|| self.default_policy.clone());
        let gate = RetryGate::new(policy, ContentValidator::new(Arc::clone(&self.rules)));
        let outcome = gate
            .execute(
                unit_id,
                session,
                producer.as_ref(),
                &inputs,
                self.sink.as_ref(),
                &self.cancel,
            )
            .await?;

        for warning in &outcome.warnings {
            tracing::warn!(unit = %unit_id, %warning, "non-blocking validation finding");
        }

        let record =
            UnitOutputRecord::success(unit_id, session, outcome.payload, outcome.attempts);
        self.persist(&record).await?;
        self.emit(
            session,
            ProgressEvent::UnitSucceeded {
                unit_id,
                attempts: outcome.attempts,
            },
        )
        .await;
        info!(unit = %unit_id, attempts = outcome.attempts, "unit succeeded");
        Ok(outcome.attempts)
    }

    /// Fetches every declared dependency's payload from the store. The plan
    /// guarantees ordering, so an absent or non-successful record here is an
    /// [`PipelineError::UnavailableDependency`].
    async fn fetch_inputs(
        &self,
        session: SessionId,
        unit: UnitId,
        graph: &DependencyGraph,
    ) -> Result<ProducerInputs, PipelineError> {
        let mut inputs = ProducerInputs::new();
        for dependency in graph.dependencies_of(unit) {
            let record = self
                .store
                .get(session, dependency)
                .await
                .map_err(|source| PipelineError::Store { unit, source })?;
            match record {
                Some(rec) if rec.status == UnitStatus::Success => {
                    inputs.insert(dependency, rec.payload);
                }
                _ => {
                    return Err(PipelineError::UnavailableDependency {
                        unit,
                        dependency,
                        session,
                    })
                }
            }
        }
        Ok(inputs)
    }

    async fn completed_in_store(
        &self,
        session: SessionId,
        unit: UnitId,
    ) -> Result<bool, PipelineError> {
        let record = self
            .store
            .get(session, unit)
            .await
            .map_err(|source| PipelineError::Store { unit, source })?;
        Ok(matches!(record, Some(rec) if rec.status == UnitStatus::Success))
    }

    async fn persist(&self, record: &UnitOutputRecord) -> Result<(), PipelineError> {
        self.store
            .put(record)
            .await
            .map_err(|source| PipelineError::Store {
                unit: record.unit_id,
                source,
            })
    }

    async fn emit(&self, session: SessionId, event: ProgressEvent) {
        self.sink.emit(session, event).await;
    }
}

fn interrupted_attempts(err: &PipelineError) -> u32 {
    match err {
        PipelineError::Interrupted { attempts, .. } => *attempts,
        _ => 0,
    }
}

fn failed_attempts(err: &PipelineError) -> u32 {
    match err {
        PipelineError::ValidationExhausted { attempts, .. } => *attempts,
        PipelineError::Producer { .. } => 1,
        _ => 0,
    }
}
