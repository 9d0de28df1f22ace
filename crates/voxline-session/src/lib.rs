//! Redis-backed implementation of the `SessionStore` port.
//!
//! One record per live call at `session:{call_id}`, holding the JSON
//! [`SessionSnapshot`] with a TTL refreshed on every write. The record is
//! a mirror for cross-process observability: the owning pipeline holds
//! the authoritative session, deletes the record on normal termination,
//! and relies on the TTL to clean up after crashes.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use voxline_core::CallId;
use voxline_core::SessionSnapshot;
use voxline_core::ports::{SessionStore, SessionStoreError};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RedisSessionConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Record TTL, refreshed on every write.
    pub ttl: Duration,
}

/// Redis session mirror.
///
/// `ConnectionManager` multiplexes one connection and reconnects on
/// failure, so the store is a cheap `Clone` shared by every pipeline.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    /// Connect to the shared KV store.
    pub async fn connect(config: RedisSessionConfig) -> Result<Self, SessionStoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))?;

        tracing::info!(ttl_s = config.ttl.as_secs(), "Connected to session store");
        Ok(Self {
            connection,
            ttl_seconds: config.ttl.as_secs(),
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError> {
        let payload = serde_json::to_string(snapshot).map_err(|e| SessionStoreError::Corrupt {
            call_id: snapshot.call_id,
            message: e.to_string(),
        })?;

        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(snapshot.call_id.kv_key(), payload, self.ttl_seconds)
            .await
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, call_id: CallId) -> Result<Option<SessionSnapshot>, SessionStoreError> {
        let mut connection = self.connection.clone();
        let payload: Option<String> = connection
            .get(call_id.kv_key())
            .await
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))?;

        payload
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|e| SessionStoreError::Corrupt {
                    call_id,
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    async fn delete(&self, call_id: CallId) -> Result<(), SessionStoreError> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(call_id.kv_key())
            .await
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SessionStoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut connection)
            .await
            .map_err(|e| SessionStoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use voxline_core::CallState;

    #[test]
    fn snapshot_payload_matches_the_documented_kv_shape() {
        let snapshot = SessionSnapshot {
            call_id: CallId::new(Uuid::nil()),
            state: CallState::Listening,
            started_at: Utc::now(),
            last_activity_at: Utc::now(),
            consecutive_timeouts: 1,
        };
        let payload = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(payload["state"], "listening");
        assert_eq!(payload["consecutive_timeouts"], 1);
        assert!(payload.get("started_at").is_some());
        assert!(payload.get("last_activity_at").is_some());
        // No audio and no transcripts in the mirrored record.
        assert!(payload.get("history").is_none());
    }

    #[tokio::test]
    async fn connect_to_unreachable_store_reports_unavailable() {
        let result = RedisSessionStore::connect(RedisSessionConfig {
            url: "redis://127.0.0.1:1/".into(),
            ttl: Duration::from_secs(1800),
        })
        .await;
        assert!(matches!(result, Err(SessionStoreError::Unavailable(_))));
    }
}
