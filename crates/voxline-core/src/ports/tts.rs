//! Speech-synthesis port.
//!
//! Audio is LINEAR16 PCM at 16 kHz, mono, little-endian — the same format
//! the wire protocol carries, so synthesized bytes go straight into audio
//! frames. Chunks from [`TtsEngine::synthesize_stream`] are aligned to
//! sentence boundaries so every chunk is independently playable and
//! playback can start before the full reply is synthesized.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced across the TTS port.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The provider rejected or failed the synthesis request.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// Provider unreachable (network-level failure).
    #[error("Synthesis provider unreachable: {0}")]
    Unreachable(String),
}

/// Speech-synthesis engine with a phrase cache.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesize `text` into one contiguous PCM buffer.
    ///
    /// Repeat calls with the same text (and unchanged voice parameters)
    /// return byte-identical audio: results are served from the phrase
    /// cache after the first synthesis.
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError>;

    /// Synthesize `text` sentence by sentence, yielding each sentence's
    /// audio as soon as it is ready.
    ///
    /// The stream closes after the last sentence, or after yielding an
    /// error for a sentence that failed.
    async fn synthesize_stream(
        &self,
        text: &str,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError>;

    /// Cheap reachability probe for the readiness endpoint.
    async fn probe(&self) -> Result<(), TtsError>;
}
