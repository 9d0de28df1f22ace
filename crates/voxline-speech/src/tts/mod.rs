//! Cloud TTS engine with a phrase cache and sentence-aligned streaming.

pub mod cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;

use voxline_core::ports::{TtsEngine, TtsError};

use crate::phrases::Phrase;
use crate::text::split_sentences;
use cache::PhraseCache;

/// Provider and voice configuration for the cloud TTS engine.
#[derive(Debug, Clone)]
pub struct CloudTtsConfig {
    /// Provider base URL.
    pub endpoint: String,
    pub api_key: String,
    pub voice: String,
    /// Speaking rate multiplier (0.5–2.0).
    pub speaking_rate: f32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl CloudTtsConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            voice: voice.into(),
            speaking_rate: 1.0,
            sample_rate: 16_000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP speech synthesizer returning LINEAR16 PCM, fronted by a
/// process-global [`PhraseCache`].
pub struct CloudTtsEngine {
    client: reqwest::Client,
    config: CloudTtsConfig,
    cache: Arc<PhraseCache>,
}

impl CloudTtsEngine {
    /// Build the engine. The cache is shared, not owned: the composition
    /// root constructs one cache per process and injects it here.
    pub fn new(config: CloudTtsConfig, cache: Arc<PhraseCache>) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TtsError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    /// Synthesize every hot phrase into the cache so call-start and
    /// failure paths never wait on the provider.
    pub async fn preload_hot_phrases(&self) -> Result<(), TtsError> {
        for phrase in Phrase::ALL {
            self.synthesize(phrase.text()).await?;
        }
        tracing::info!(phrases = Phrase::ALL.len(), "TTS hot phrases preloaded");
        Ok(())
    }

    fn cache_key(&self, text: &str) -> String {
        PhraseCache::key(
            text,
            &self.config.voice,
            self.config.speaking_rate,
            self.config.sample_rate,
        )
    }

    async fn synthesize_uncached(&self, text: &str) -> Result<Bytes, TtsError> {
        let response = self
            .client
            .post(format!("{}/v1/synthesize", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "text": text,
                "voice": self.config.voice,
                "speaking_rate": self.config.speaking_rate,
                "sample_rate": self.config.sample_rate,
                "encoding": "LINEAR16",
            }))
            .send()
            .await
            .map_err(|e| TtsError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Synthesis(format!(
                "provider returned {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| TtsError::Unreachable(e.to_string()))?;

        tracing::debug!(text_len = text.len(), bytes = audio.len(), "Synthesized phrase");
        Ok(audio)
    }
}

#[async_trait]
impl TtsEngine for CloudTtsEngine {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }

        let key = self.cache_key(text);
        if let Some(audio) = self.cache.get(&key) {
            return Ok(audio);
        }

        let audio = self.synthesize_uncached(text).await?;
        self.cache.insert(key.clone(), audio);
        // Read back through the cache so concurrent first synthesizers all
        // return the bytes that actually won the insert race.
        self.cache
            .get(&key)
            .ok_or_else(|| TtsError::Synthesis("cache insert lost".to_string()))
    }

    async fn synthesize_stream(
        &self,
        text: &str,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError> {
        let sentences = split_sentences(text);
        let (tx, rx) = mpsc::channel(sentences.len().max(1));

        // Synthesize sentence-by-sentence in a helper task so the first
        // chunk is playable while later ones are still in flight.
        let engine = self.clone_for_task();
        tokio::spawn(async move {
            for sentence in sentences {
                let result = engine.synthesize(&sentence).await;
                let failed = result.is_err();
                if tx.send(result).await.is_err() {
                    // Receiver gone — playback was cancelled (barge-in).
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn probe(&self) -> Result<(), TtsError> {
        self.client
            .get(format!("{}/health", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| TtsError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        Ok(())
    }
}

impl CloudTtsEngine {
    /// Cheap clone for helper tasks (client and cache are shared handles).
    fn clone_for_task(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}
