//! Shared session-store port.
//!
//! The KV record is a mirror for cross-process observability and crash
//! cleanup, never a source of truth: the owning pipeline holds the real
//! session and is the only writer for its `call_id`. Orphaned records
//! expire via TTL.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{CallId, SessionSnapshot};

/// Errors surfaced across the session-store port.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    /// The store is unreachable or the connection dropped.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("Corrupt session record for {call_id}: {message}")]
    Corrupt { call_id: CallId, message: String },
}

/// Shared KV mirror of per-call session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert the snapshot at `session:{call_id}`, refreshing its TTL.
    async fn put(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError>;

    /// Fetch a snapshot, `None` when absent or expired.
    async fn get(&self, call_id: CallId) -> Result<Option<SessionSnapshot>, SessionStoreError>;

    /// Remove the record on normal call termination. Removing an absent
    /// record is not an error.
    async fn delete(&self, call_id: CallId) -> Result<(), SessionStoreError>;

    /// Liveness probe for the health endpoints.
    async fn ping(&self) -> Result<(), SessionStoreError>;
}
