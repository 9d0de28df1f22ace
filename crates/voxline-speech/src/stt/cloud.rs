//! Cloud streaming recognizer.
//!
//! One [`CloudSttEngine::start`] call opens a session task that owns the
//! provider connection. Audio flows in over a bounded channel; transcript
//! events flow out as newline-delimited JSON on the response body.
//!
//! The provider caps stream lifetime at roughly five minutes, so the task
//! rotates its underlying connection well before the cap and on transient
//! errors, keeping the caller-visible transcript sequence unbroken. Only
//! after the reconnect budget is exhausted does the transcript stream
//! close.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use voxline_core::ports::{
    SttConfig, SttEngine, SttError, SttFeed, SttFeeder, SttSession, Transcript,
};

/// Rotate the provider stream after this long, safely under the ~5-minute
/// provider cap.
const STREAM_ROTATE_AFTER: Duration = Duration::from_secs(240);

/// Transient-error retry budget per rotation.
const RECONNECT_ATTEMPTS: u32 = 3;

/// Delay between reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Frames buffered towards the provider (~5 s of audio at 20 ms frames)
/// before the feeder starts shedding.
const FEED_BUFFER_FRAMES: usize = 256;

/// Provider configuration for the cloud recognizer.
#[derive(Debug, Clone)]
pub struct CloudSttConfig {
    /// Provider base URL.
    pub endpoint: String,
    pub api_key: String,
}

impl CloudSttConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

/// Streaming STT over chunked HTTP.
pub struct CloudSttEngine {
    client: reqwest::Client,
    config: CloudSttConfig,
}

impl CloudSttEngine {
    pub fn new(config: CloudSttConfig) -> Result<Self, SttError> {
        // No overall timeout: recognition streams are long-lived by design.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SttError::StartFailed(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SttEngine for CloudSttEngine {
    async fn start(&self, config: SttConfig) -> Result<SttSession, SttError> {
        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(FEED_BUFFER_FRAMES);
        let (transcript_tx, transcript_rx) = mpsc::channel::<Transcript>(64);

        let feed = Arc::new(CloudFeed {
            audio_tx: std::sync::Mutex::new(Some(audio_tx)),
        });

        let worker = SessionWorker {
            client: self.client.clone(),
            provider: self.config.clone(),
            recognition: config,
            audio_rx,
            transcript_tx,
        };
        tokio::spawn(worker.run());

        Ok(SttSession {
            feeder: SttFeeder::new(feed),
            transcripts: transcript_rx,
        })
    }

    async fn probe(&self) -> Result<(), SttError> {
        self.client
            .get(format!("{}/health", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| SttError::StartFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| SttError::Provider(e.to_string()))?;
        Ok(())
    }
}

// ── Feed handle ────────────────────────────────────────────────────

struct CloudFeed {
    /// `None` once stopped; dropping the sender is what the worker
    /// observes as end-of-audio.
    audio_tx: std::sync::Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl SttFeed for CloudFeed {
    fn feed(&self, pcm: Bytes) -> Result<(), SttError> {
        let guard = self.audio_tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SttError::SessionClosed);
        };
        match tx.try_send(pcm) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Shed the frame rather than stall the ingress loop.
                tracing::warn!("STT feed buffer full, shedding audio frame");
                metrics::counter!("voxline_stt_frames_shed_total").increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SttError::SessionClosed),
        }
    }

    fn stop(&self) {
        self.audio_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }
}

// ── Session worker ─────────────────────────────────────────────────

/// One JSON transcript event from the provider.
#[derive(Debug, Deserialize)]
struct WireEvent {
    text: String,
    #[serde(rename = "final")]
    is_final: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    language: Option<String>,
}

struct SessionWorker {
    client: reqwest::Client,
    provider: CloudSttConfig,
    recognition: SttConfig,
    audio_rx: mpsc::Receiver<Bytes>,
    transcript_tx: mpsc::Sender<Transcript>,
}

impl SessionWorker {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            match self.run_one_connection().await {
                ConnectionEnd::AudioFinished => {
                    tracing::debug!("Recognition session finished");
                    return;
                }
                ConnectionEnd::Rotate => {
                    failures = 0;
                    tracing::debug!("Rotating recognition stream before provider limit");
                }
                ConnectionEnd::TranscriptsDropped => return,
                ConnectionEnd::Transient(message) => {
                    failures += 1;
                    if failures > RECONNECT_ATTEMPTS {
                        tracing::error!(
                            error = %message,
                            attempts = failures,
                            "Recognition provider failed beyond retry budget, closing stream"
                        );
                        return;
                    }
                    tracing::warn!(error = %message, attempt = failures, "Recognition stream error, reconnecting");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    /// Drive one provider connection until rotation, end-of-audio, or error.
    async fn run_one_connection(&mut self) -> ConnectionEnd {
        let (body_tx, body_rx) = mpsc::channel::<Bytes>(FEED_BUFFER_FRAMES);
        let body = reqwest::Body::wrap_stream(
            ReceiverStream::new(body_rx).map(Ok::<_, std::convert::Infallible>),
        );

        let alt = self.recognition.alternate_languages.join(",");
        let request = self
            .client
            .post(format!("{}/v1/streams", self.provider.endpoint))
            .bearer_auth(&self.provider.api_key)
            .query(&[
                ("language", self.recognition.primary_language.as_str()),
                ("alternates", alt.as_str()),
                ("sample_rate", "16000"),
                ("encoding", "linear16"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);

        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => return ConnectionEnd::Transient(format!("provider returned {}", r.status())),
            Err(e) => return ConnectionEnd::Transient(e.to_string()),
        };

        let mut events = response.bytes_stream();
        let mut line_buf = Vec::new();
        let rotate_at = Instant::now() + STREAM_ROTATE_AFTER;

        loop {
            tokio::select! {
                // Forward caller audio into the in-flight request body.
                frame = self.audio_rx.recv() => {
                    match frame {
                        Some(pcm) => {
                            if body_tx.send(pcm).await.is_err() {
                                return ConnectionEnd::Transient("provider closed request body".into());
                            }
                        }
                        // Feeder dropped/stopped: close the body and drain
                        // the provider's remaining events below.
                        None => {
                            drop(body_tx);
                            return self.drain_events(events, line_buf).await;
                        }
                    }
                }

                // Parse provider transcript events as they stream in.
                chunk = events.next() => {
                    match chunk {
                        Some(Ok(data)) => {
                            if let Err(end) = self.consume_chunk(&data, &mut line_buf).await {
                                return end;
                            }
                        }
                        Some(Err(e)) => return ConnectionEnd::Transient(e.to_string()),
                        None => return ConnectionEnd::Transient("provider ended stream".into()),
                    }
                }

                // Rotate before the provider's session-length cap.
                () = tokio::time::sleep_until(rotate_at) => {
                    return ConnectionEnd::Rotate;
                }
            }
        }
    }

    /// Feed one response chunk into the line buffer and emit any complete
    /// transcript events.
    async fn consume_chunk(
        &self,
        data: &[u8],
        line_buf: &mut Vec<u8>,
    ) -> Result<(), ConnectionEnd> {
        line_buf.extend_from_slice(data);
        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = line_buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<WireEvent>(line) {
                Ok(event) => {
                    let transcript = Transcript {
                        text: event.text,
                        is_final: event.is_final,
                        confidence: event.confidence,
                        detected_language: event.language,
                    };
                    if self.transcript_tx.send(transcript).await.is_err() {
                        return Err(ConnectionEnd::TranscriptsDropped);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed transcript event");
                }
            }
        }
        Ok(())
    }

    /// After end-of-audio, give the provider a moment to flush its final
    /// transcripts, then finish.
    async fn drain_events(
        &self,
        mut events: impl futures_util::Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
        mut line_buf: Vec<u8>,
    ) -> ConnectionEnd {
        let deadline = Duration::from_secs(2);
        loop {
            match tokio::time::timeout(deadline, events.next()).await {
                Ok(Some(Ok(data))) => {
                    if let Err(end) = self.consume_chunk(&data, &mut line_buf).await {
                        return end;
                    }
                }
                Ok(Some(Err(_)) | None) | Err(_) => return ConnectionEnd::AudioFinished,
            }
        }
    }
}

enum ConnectionEnd {
    /// The feeder closed; the session is complete.
    AudioFinished,
    /// Planned rotation below the provider's stream-lifetime cap.
    Rotate,
    /// The transcript receiver is gone; nobody is listening.
    TranscriptsDropped,
    /// Connection-level failure worth a bounded reconnect.
    Transient(String),
}
