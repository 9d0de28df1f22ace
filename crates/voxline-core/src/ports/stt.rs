//! Streaming speech-recognition port.
//!
//! One [`SttEngine`] is constructed per process and starts one
//! [`SttSession`] per call. The session splits into a cheaply clonable
//! [`SttFeeder`] (used by the ingress activity) and a single transcript
//! receiver (consumed by the dialogue activity). The transcript stream is
//! finite and not restartable: it closes when the session stops or dies
//! unrecoverably.
//!
//! Engines own their provider quirks internally. In particular, providers
//! with a bounded stream lifetime must reconnect transparently so the
//! caller-visible transcript sequence never breaks, and transient provider
//! errors are retried inside the engine.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Recognition parameters for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Primary language hint (BCP-47).
    pub primary_language: String,
    /// Additional language hints, in preference order.
    pub alternate_languages: Vec<String>,
    /// Input sample rate in Hz (the wire protocol delivers 16 kHz).
    pub sample_rate: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            primary_language: "uk-UA".to_string(),
            alternate_languages: Vec::new(),
            sample_rate: 16_000,
        }
    }
}

/// One recognition result.
///
/// `is_final == true` marks the canonical utterance boundary; interim
/// results may be revised by later ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    /// Provider confidence in 0.0–1.0 (0.0 when the provider gives none).
    pub confidence: f32,
    pub detected_language: Option<String>,
}

/// Errors surfaced across the STT port.
#[derive(Debug, Error)]
pub enum SttError {
    /// Could not open a recognition session.
    #[error("Failed to start recognition session: {0}")]
    StartFailed(String),

    /// The session has already stopped; feeding is no longer possible.
    #[error("Recognition session is closed")]
    SessionClosed,

    /// Unrecoverable provider failure; the transcript stream has closed.
    #[error("Recognition provider failed: {0}")]
    Provider(String),
}

/// Audio-ingest side of a session. Implemented by each engine.
pub trait SttFeed: Send + Sync {
    /// Enqueue one PCM frame. Non-blocking: the engine may buffer, and may
    /// shed oldest frames under backpressure rather than stall the caller.
    fn feed(&self, pcm: Bytes) -> Result<(), SttError>;

    /// Signal the session to stop. Idempotent; resource release completes
    /// in the background and the transcript stream closes.
    fn stop(&self);
}

/// Clonable handle over the ingest side of a session.
#[derive(Clone)]
pub struct SttFeeder {
    inner: Arc<dyn SttFeed>,
}

impl SttFeeder {
    #[must_use]
    pub fn new(inner: Arc<dyn SttFeed>) -> Self {
        Self { inner }
    }

    /// See [`SttFeed::feed`].
    pub fn feed(&self, pcm: Bytes) -> Result<(), SttError> {
        self.inner.feed(pcm)
    }

    /// See [`SttFeed::stop`].
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl std::fmt::Debug for SttFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttFeeder").finish_non_exhaustive()
    }
}

/// A live recognition session: feeder plus the transcript stream.
#[derive(Debug)]
pub struct SttSession {
    pub feeder: SttFeeder,
    pub transcripts: mpsc::Receiver<Transcript>,
}

/// Streaming speech-recognition engine.
#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Open a recognition session for one call.
    async fn start(&self, config: SttConfig) -> Result<SttSession, SttError>;

    /// Cheap reachability probe for the readiness endpoint.
    async fn probe(&self) -> Result<(), SttError>;
}
