//! Port traits implemented by infrastructure crates.
//!
//! The domain crate defines *what* it needs; infrastructure crates define
//! *how* to supply it. Everything here is dyn-compatible and async because
//! producer invocations and store round-trips are long-latency network
//! operations that must suspend without blocking unrelated work.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ProducerError, ProgressEvent, SessionId, StoreError, UnitId, UnitOutputRecord};

/// The inputs handed to a producer: its declared dependencies' payloads,
/// keyed by the dependency's unit id.
pub type ProducerInputs = HashMap<UnitId, Value>;

// ---------------------------------------------------------------------------

/// The unit-specific artifact generator.
///
/// Implementations are registered with the registry as factories and invoked
/// only through the retry-validation gate. A failed attempt must leave no
/// side-effects that would corrupt state on retry.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Produces this unit's artifact for `session` from its dependencies'
    /// payloads.
    async fn run(&self, session: SessionId, inputs: &ProducerInputs)
        -> Result<Value, ProducerError>;
}

// ---------------------------------------------------------------------------

/// Minimal contract over the networked key-value store holding output
/// records, keyed by `(session, unit)`.
///
/// `put` is idempotent and read-after-write consistent within a session.
/// Since keys are unique per (unit, session) no locking beyond the store's
/// own single-put atomicity is required.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetches the record for `(session, unit)`, or `None` if absent.
    async fn get(
        &self,
        session: SessionId,
        unit: UnitId,
    ) -> Result<Option<UnitOutputRecord>, StoreError>;

    /// Persists `record` under `(record.session_id, record.unit_id)`.
    async fn put(&self, record: &UnitOutputRecord) -> Result<(), StoreError>;

    /// Returns `true` if a record exists for `(session, unit)`.
    async fn exists(&self, session: SessionId, unit: UnitId) -> Result<bool, StoreError>;
}

// ---------------------------------------------------------------------------

/// External sink for structured progress events.
///
/// The scheduler emits lifecycle events and the retry gate emits
/// `UnitRetrying` as each backoff begins. The sink's rendering is out of
/// scope; every event is mirrored as a `tracing` event regardless of the
/// sink in use.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Delivers one progress event. Sinks must not fail the run; delivery
    /// problems are theirs to log and swallow.
    async fn emit(&self, session: SessionId, event: ProgressEvent);
}

/// A [`ProgressSink`] that discards every event.
///
/// Useful for tests and for callers that rely on `tracing` output alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn emit(&self, _session: SessionId, _event: ProgressEvent) {}
}
