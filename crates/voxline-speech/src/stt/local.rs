//! Locally-hosted batch recognizer.
//!
//! The local provider has no streaming interface, so the engine segments
//! utterances itself with an RMS energy gate and submits each closed
//! segment as one batch request. Only final transcripts are emitted; there
//! are no interim results on this path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;

use voxline_core::ports::{
    SttConfig, SttEngine, SttError, SttFeed, SttFeeder, SttSession, Transcript,
};

/// Energy-gate tuning.
#[derive(Debug, Clone)]
pub struct EnergyGateConfig {
    /// RMS level (0.0–1.0 of full scale) above which a frame counts as
    /// speech.
    pub speech_threshold: f32,
    /// Consecutive speech frames required to open the gate.
    pub start_frames: usize,
    /// Consecutive silent frames required to close it (hangover).
    pub end_frames: usize,
    /// Segments shorter than this are discarded as noise.
    pub min_segment: Duration,
}

impl Default for EnergyGateConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.015,
            start_frames: 3,    // 60 ms of sustained speech
            end_frames: 35,     // 700 ms of trailing silence
            min_segment: Duration::from_millis(300),
        }
    }
}

/// Provider configuration for the local batch recognizer.
#[derive(Debug, Clone)]
pub struct LocalSttConfig {
    /// Local recognizer base URL.
    pub endpoint: String,
    pub gate: EnergyGateConfig,
    /// Per-segment request timeout.
    pub request_timeout: Duration,
}

impl LocalSttConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            gate: EnergyGateConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Batch STT behind the streaming port.
pub struct LocalBatchSttEngine {
    client: reqwest::Client,
    config: LocalSttConfig,
}

impl LocalBatchSttEngine {
    pub fn new(config: LocalSttConfig) -> Result<Self, SttError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SttError::StartFailed(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SttEngine for LocalBatchSttEngine {
    async fn start(&self, config: SttConfig) -> Result<SttSession, SttError> {
        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(256);
        let (transcript_tx, transcript_rx) = mpsc::channel::<Transcript>(16);

        let worker = BatchWorker {
            client: self.client.clone(),
            provider: self.config.clone(),
            recognition: config,
            gate: EnergyGate::new(self.config.gate.clone()),
            audio_rx,
            transcript_tx,
        };
        tokio::spawn(worker.run());

        Ok(SttSession {
            feeder: SttFeeder::new(Arc::new(LocalFeed {
                audio_tx: std::sync::Mutex::new(Some(audio_tx)),
            })),
            transcripts: transcript_rx,
        })
    }

    async fn probe(&self) -> Result<(), SttError> {
        self.client
            .get(format!("{}/health", self.config.endpoint))
            .send()
            .await
            .map_err(|e| SttError::StartFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| SttError::Provider(e.to_string()))?;
        Ok(())
    }
}

struct LocalFeed {
    audio_tx: std::sync::Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl SttFeed for LocalFeed {
    fn feed(&self, pcm: Bytes) -> Result<(), SttError> {
        let guard = self.audio_tx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SttError::SessionClosed);
        };
        match tx.try_send(pcm) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Local STT buffer full, shedding audio frame");
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

// ── Energy gate ────────────────────────────────────────────────────

/// RMS of one frame of 16-bit little-endian PCM, as a fraction of full
/// scale.
#[must_use]
pub(crate) fn frame_rms(pcm: &[u8]) -> f32 {
    if pcm.len() < 2 {
        return 0.0;
    }
    let mut sum_sq = 0.0f64;
    let samples = pcm.len() / 2;
    for chunk in pcm.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([chunk[0], chunk[1]])) / f64::from(i16::MAX);
        sum_sq += sample * sample;
    }
    #[allow(clippy::cast_possible_truncation)]
    let rms = (sum_sq / samples as f64).sqrt() as f32;
    rms
}

/// What the gate decided about one fed frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum GateEvent {
    /// Still waiting for speech.
    Idle,
    /// Inside an utterance.
    Speech,
    /// Utterance ended; the accumulated segment is returned.
    SegmentClosed(Vec<u8>),
}

/// Speech-boundary detector over frame RMS levels.
pub(crate) struct EnergyGate {
    config: EnergyGateConfig,
    in_speech: bool,
    run_length: usize,
    segment: Vec<u8>,
    /// Recent frames kept while idle so the opening of an utterance is not
    /// clipped once the gate triggers.
    preroll: std::collections::VecDeque<Vec<u8>>,
}

impl EnergyGate {
    pub(crate) fn new(config: EnergyGateConfig) -> Self {
        Self {
            config,
            in_speech: false,
            run_length: 0,
            segment: Vec::new(),
            preroll: std::collections::VecDeque::new(),
        }
    }

    pub(crate) fn push_frame(&mut self, pcm: &[u8]) -> GateEvent {
        let loud = frame_rms(pcm) >= self.config.speech_threshold;

        if self.in_speech {
            self.segment.extend_from_slice(pcm);
            if loud {
                self.run_length = 0;
            } else {
                self.run_length += 1;
                if self.run_length >= self.config.end_frames {
                    self.in_speech = false;
                    self.run_length = 0;
                    let segment = std::mem::take(&mut self.segment);
                    return GateEvent::SegmentClosed(segment);
                }
            }
            GateEvent::Speech
        } else {
            self.preroll.push_back(pcm.to_vec());
            if self.preroll.len() > self.config.start_frames {
                self.preroll.pop_front();
            }
            if loud {
                self.run_length += 1;
                if self.run_length >= self.config.start_frames {
                    self.in_speech = true;
                    self.run_length = 0;
                    for frame in self.preroll.drain(..) {
                        self.segment.extend_from_slice(&frame);
                    }
                    return GateEvent::Speech;
                }
            } else {
                self.run_length = 0;
            }
            GateEvent::Idle
        }
    }

    /// Close any in-flight segment at end of stream.
    pub(crate) fn finish(&mut self) -> Option<Vec<u8>> {
        if self.in_speech && !self.segment.is_empty() {
            self.in_speech = false;
            Some(std::mem::take(&mut self.segment))
        } else {
            None
        }
    }

    /// Segment length in wall-clock audio time (16 kHz, 16-bit mono).
    pub(crate) fn segment_duration(segment: &[u8]) -> Duration {
        Duration::from_micros((segment.len() as u64 / 2) * 1_000_000 / 16_000)
    }
}

// ── Batch worker ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BatchResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    language: Option<String>,
}

struct BatchWorker {
    client: reqwest::Client,
    provider: LocalSttConfig,
    recognition: SttConfig,
    gate: EnergyGate,
    audio_rx: mpsc::Receiver<Bytes>,
    transcript_tx: mpsc::Sender<Transcript>,
}

impl BatchWorker {
    async fn run(mut self) {
        while let Some(frame) = self.audio_rx.recv().await {
            if let GateEvent::SegmentClosed(segment) = self.gate.push_frame(&frame) {
                if !self.recognize_segment(segment).await {
                    return;
                }
            }
        }
        if let Some(segment) = self.gate.finish() {
            self.recognize_segment(segment).await;
        }
        tracing::debug!("Local recognition session finished");
    }

    /// Submit one closed segment; returns `false` when the transcript
    /// receiver is gone.
    async fn recognize_segment(&self, segment: Vec<u8>) -> bool {
        let duration = EnergyGate::segment_duration(&segment);
        if duration < self.provider.gate.min_segment {
            tracing::debug!(ms = duration.as_millis(), "Discarding sub-minimum segment");
            return true;
        }

        // One retry on transient failure, then the segment is dropped and
        // the session keeps running.
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.submit(&segment).await {
                Ok(response) => break response,
                Err(e) if attempt <= 1 => {
                    tracing::warn!(error = %e, "Batch recognition failed, retrying once");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Batch recognition failed, dropping segment");
                    return true;
                }
            }
        };

        if response.text.trim().is_empty() {
            return true;
        }

        let transcript = Transcript {
            text: response.text,
            is_final: true,
            confidence: response.confidence,
            detected_language: response.language,
        };
        self.transcript_tx.send(transcript).await.is_ok()
    }

    async fn submit(&self, segment: &[u8]) -> Result<BatchResponse, SttError> {
        let response = self
            .client
            .post(format!("{}/v1/recognize", self.provider.endpoint))
            .query(&[
                ("language", self.recognition.primary_language.as_str()),
                ("sample_rate", "16000"),
                ("encoding", "linear16"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(segment.to_vec())
            .send()
            .await
            .map_err(|e| SttError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| SttError::Provider(e.to_string()))?;

        response
            .json::<BatchResponse>()
            .await
            .map_err(|e| SttError::Provider(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20 ms frame (640 bytes) at a constant 16-bit amplitude.
    fn frame(amplitude: i16) -> Vec<u8> {
        let mut pcm = Vec::with_capacity(640);
        for _ in 0..320 {
            pcm.extend_from_slice(&amplitude.to_le_bytes());
        }
        pcm
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(frame_rms(&frame(0)) < f32::EPSILON);
    }

    #[test]
    fn rms_scales_with_amplitude() {
        assert!(frame_rms(&frame(8_000)) > frame_rms(&frame(400)));
    }

    #[test]
    fn gate_opens_after_sustained_speech_and_closes_after_hangover() {
        let config = EnergyGateConfig {
            speech_threshold: 0.01,
            start_frames: 3,
            end_frames: 5,
            min_segment: Duration::from_millis(0),
        };
        let mut gate = EnergyGate::new(config);
        let loud = frame(8_000);
        let quiet = frame(0);

        assert_eq!(gate.push_frame(&loud), GateEvent::Idle);
        assert_eq!(gate.push_frame(&loud), GateEvent::Idle);
        assert_eq!(gate.push_frame(&loud), GateEvent::Speech);

        for _ in 0..4 {
            assert_eq!(gate.push_frame(&quiet), GateEvent::Speech);
        }
        match gate.push_frame(&quiet) {
            GateEvent::SegmentClosed(segment) => {
                // Pre-roll (3 loud frames) + 5 hangover frames.
                assert_eq!(segment.len(), 8 * 640);
            }
            other => panic!("expected closed segment, got {other:?}"),
        }
    }

    #[test]
    fn brief_noise_does_not_open_the_gate() {
        let mut gate = EnergyGate::new(EnergyGateConfig::default());
        let loud = frame(8_000);
        let quiet = frame(0);

        assert_eq!(gate.push_frame(&loud), GateEvent::Idle);
        assert_eq!(gate.push_frame(&quiet), GateEvent::Idle);
        assert_eq!(gate.push_frame(&loud), GateEvent::Idle);
        assert_eq!(gate.push_frame(&quiet), GateEvent::Idle);
    }

    #[test]
    fn finish_flushes_open_segment() {
        let config = EnergyGateConfig {
            speech_threshold: 0.01,
            start_frames: 1,
            end_frames: 100,
            min_segment: Duration::ZERO,
        };
        let mut gate = EnergyGate::new(config);
        gate.push_frame(&frame(8_000));
        assert!(gate.finish().is_some());
        assert!(gate.finish().is_none());
    }

    #[test]
    fn segment_duration_matches_sample_math() {
        // 16_000 samples * 2 bytes = 1 second.
        assert_eq!(
            EnergyGate::segment_duration(&vec![0u8; 32_000]),
            Duration::from_secs(1)
        );
    }
}
