//! State store infrastructure adapters.
//!
//! Implements the [`pipeline::StateStore`] trait with two backends:
//!
//! - [`HttpStateStore`] — a thin client for a networked key-value service.
//!   Records live under `sessions/{session}/units/{unit}`; a `404` on read
//!   maps to "absent", and `PUT` is idempotent, so re-persisting the same
//!   record on a resume is harmless.
//!
//! - [`MemoryStateStore`] — an in-process map for tests and single-process
//!   local runs.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport, URL layout, and response decoding live
//! here. The [`pipeline`] crate sees only [`pipeline::StateStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::debug;

use pipeline::{SessionId, StateStore, StoreError, UnitId, UnitOutputRecord};

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

/// [`StateStore`] over a networked key-value service speaking JSON.
#[derive(Debug, Clone)]
pub struct HttpStateStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStateStore {
    /// Creates a store client for the service at `base_url`
    /// (e.g. `"http://state.internal:7800"`; any trailing slash is trimmed).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn record_url(&self, session: SessionId, unit: UnitId) -> String {
        format!("{}/sessions/{session}/units/{unit}", self.base_url)
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport {
        message: e.to_string(),
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn get(
        &self,
        session: SessionId,
        unit: UnitId,
    ) -> Result<Option<UnitOutputRecord>, StoreError> {
        let url = self.record_url(session, unit);
        let response = self.client.get(&url).send().await.map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record = response
                    .json::<UnitOutputRecord>()
                    .await
                    .map_err(|e| StoreError::Decode {
                        message: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            status => Err(StoreError::Transport {
                message: format!("GET {url} returned {status}"),
            }),
        }
    }

    async fn put(&self, record: &UnitOutputRecord) -> Result<(), StoreError> {
        let url = self.record_url(record.session_id, record.unit_id);
        debug!(unit = %record.unit_id, session = %record.session_id, status = %record.status, "persisting record");
        let response = self
            .client
            .put(&url)
            .json(record)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::Transport {
                message: format!("PUT {url} returned {}", response.status()),
            })
        }
    }

    async fn exists(&self, session: SessionId, unit: UnitId) -> Result<bool, StoreError> {
        let url = self.record_url(session, unit);
        let response = self.client.head(&url).send().await.map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Transport {
                message: format!("HEAD {url} returned {status}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter
// ---------------------------------------------------------------------------

/// [`StateStore`] backed by an in-process map.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<(SessionId, UnitId), UnitOutputRecord>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(
        &self,
        session: SessionId,
        unit: UnitId,
    ) -> Result<Option<UnitOutputRecord>, StoreError> {
        Ok(self.records.read().await.get(&(session, unit)).cloned())
    }

    async fn put(&self, record: &UnitOutputRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert((record.session_id, record.unit_id), record.clone());
        Ok(())
    }

    async fn exists(&self, session: SessionId, unit: UnitId) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(&(session, unit)))
    }
}
