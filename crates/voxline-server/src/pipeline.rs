//! The per-call pipeline.
//!
//! Two cooperating activities bound to one call:
//!
//! 1. **Ingress** (spawned task) — reads wire frames, feeds caller PCM to
//!    the recognizer, and fires the call's cancellation token on hangup,
//!    peer error, or protocol violation.
//! 2. **Dialogue** (this task) — consumes the transcript stream, drives
//!    the agent for each finalized utterance, and streams synthesized
//!    replies back at one 20 ms frame per 20 ms of wall clock.
//!
//! ```text
//!   Connected → Greeting → Listening ⇄ Processing → Speaking ⇄ Listening
//!                                                            ↘ Transferring → Ended
//!                              ↘ (2× silence timeout) → Ended
//!   (any state) → (hangup / fatal) → Ended
//! ```
//!
//! Barge-in: the first transcript (interim or final) observed while audio
//! is being paced stops playback, discards the queued synthesis chunks,
//! and returns the call to `Listening`. Teardown releases the STT session,
//! the connection, and the KV mirror on every exit path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voxline_agent::{Agent, TurnOutcome};
use voxline_core::ports::{
    SessionStore, SttConfig, SttEngine, SttFeeder, Transcript, TtsEngine, TtsError,
};
use voxline_core::{CallSession, CallState};
use voxline_protocol::{AUDIO_FRAME_BYTES, AUDIO_FRAME_DURATION, Frame, FrameReader, FrameWriter};
use voxline_speech::phrases::Phrase;

/// Everything a pipeline needs injected; all process-global singletons.
#[derive(Clone)]
pub struct PipelineDeps {
    pub stt: Arc<dyn SttEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub agent: Arc<Agent>,
    pub sessions: Arc<dyn SessionStore>,
}

/// Per-call policy knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stt: SttConfig,
    /// Silence window in `Listening` before the prompt plays.
    pub silence_timeout: Duration,
    /// Consecutive silence timeouts that end the call.
    pub max_silence_timeouts: u8,
    /// Floor between KV activity writes (transition writes always go out).
    pub mirror_min_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stt: SttConfig::default(),
            silence_timeout: Duration::from_secs(10),
            max_silence_timeouts: 2,
            mirror_min_interval: Duration::from_secs(5),
        }
    }
}

/// Events emitted for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged(CallState),
    /// Playback stopped because the caller started speaking.
    BargeIn,
    /// The silence prompt played; carries the consecutive count.
    SilencePrompt(u8),
    TransferInitiated,
    /// One user turn finished and the reply finished (or was barged).
    TurnCompleted,
}

/// Why the pipeline finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEnd {
    /// Caller hung up (or the connection went away).
    HungUp,
    /// Two consecutive silence timeouts.
    SilenceTimeout,
    /// Handed to a human operator.
    Transferred,
    /// Graceful shutdown drained this call into a transfer.
    Drained,
    /// Fatal pipeline error (invalid transition, engine start failure).
    Failed,
}

/// How one playback attempt ended.
#[derive(Debug, PartialEq, Eq)]
enum SpeakOutcome {
    Completed,
    BargedIn,
    Cancelled,
    Failed,
}

/// The audio being paced: one cached buffer or a sentence stream.
enum PacedSource {
    Single(Option<Bytes>),
    Stream(mpsc::Receiver<Result<Bytes, TtsError>>),
}

impl PacedSource {
    async fn next(&mut self) -> Option<Result<Bytes, TtsError>> {
        match self {
            Self::Single(audio) => audio.take().map(Ok),
            Self::Stream(rx) => rx.recv().await,
        }
    }
}

/// Throttled writer of the KV session mirror.
struct Mirror {
    store: Arc<dyn SessionStore>,
    min_interval: Duration,
    last_write: Option<Instant>,
}

impl Mirror {
    fn new(store: Arc<dyn SessionStore>, min_interval: Duration) -> Self {
        Self {
            store,
            min_interval,
            last_write: None,
        }
    }

    /// Unconditional write (state transitions).
    async fn on_transition(&mut self, session: &CallSession) {
        self.write(session).await;
    }

    /// Throttled write (steady activity).
    async fn on_activity(&mut self, session: &CallSession) {
        let due = self
            .last_write
            .is_none_or(|at| at.elapsed() >= self.min_interval);
        if due {
            self.write(session).await;
        }
    }

    async fn write(&mut self, session: &CallSession) {
        if let Err(e) = self.store.put(&session.snapshot()).await {
            tracing::warn!(call_id = %session.call_id(), error = %e, "Session mirror write failed");
        }
        self.last_write = Some(Instant::now());
    }

    async fn remove(&self, session: &CallSession) {
        if let Err(e) = self.store.delete(session.call_id()).await {
            tracing::warn!(call_id = %session.call_id(), error = %e, "Session mirror delete failed");
        }
    }
}

/// One call's pipeline. Constructed by the server after the Identify
/// handshake; owns the session exclusively until it returns.
pub struct CallPipeline {
    deps: PipelineDeps,
    config: PipelineConfig,
    session: CallSession,
    mirror: Mirror,
    cancel: CancellationToken,
    drain: CancellationToken,
    events: mpsc::UnboundedSender<CallEvent>,
    tts_failures: u8,
}

impl CallPipeline {
    /// Build a pipeline for an identified call.
    ///
    /// `cancel` ends the call outright (hangup, fatal, forced shutdown);
    /// `drain` asks for a graceful operator hand-off. Returns the pipeline
    /// and its event stream.
    #[must_use]
    pub fn new(
        deps: PipelineDeps,
        config: PipelineConfig,
        session: CallSession,
        cancel: CancellationToken,
        drain: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let mirror = Mirror::new(Arc::clone(&deps.sessions), config.mirror_min_interval);
        (
            Self {
                deps,
                config,
                session,
                mirror,
                cancel,
                drain,
                events,
                tts_failures: 0,
            },
            event_rx,
        )
    }

    /// Run the call to completion. Resource release is unconditional: the
    /// STT session, the ingress task, the connection, and the KV record
    /// are all gone by the time this returns, on every path.
    pub async fn run<R, W>(mut self, reader: FrameReader<R>, mut writer: FrameWriter<W>) -> CallEnd
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let call_id = self.session.call_id();
        tracing::info!(call_id = %call_id, "Call pipeline starting");
        self.mirror.on_transition(&self.session).await;

        let stt_session = match self.deps.stt.start(self.config.stt.clone()).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(call_id = %call_id, error = %e, "Failed to start recognition");
                self.finish_session().await;
                return CallEnd::Failed;
            }
        };
        let feeder = stt_session.feeder.clone();
        let mut transcripts = stt_session.transcripts;

        let ingress = tokio::spawn(ingress_loop(
            reader,
            stt_session.feeder,
            self.cancel.clone(),
        ));

        let end = self
            .dialogue(&mut writer, &mut transcripts)
            .await;

        // Teardown, on every exit path.
        feeder.stop();
        self.cancel.cancel();
        ingress.abort();
        self.finish_session().await;
        writer.shutdown().await;

        tracing::info!(call_id = %call_id, end = ?end, "Call pipeline finished");
        end
    }

    // ── Dialogue activity ──────────────────────────────────────────

    async fn dialogue<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
    ) -> CallEnd {
        let mut pending: VecDeque<Transcript> = VecDeque::new();

        // Greeting first: canned, cached, barge-in capable.
        if let Err(end) = self.set_state(CallState::Greeting).await {
            return end;
        }
        match self
            .speak_phrase(Phrase::Greeting, writer, transcripts, &mut pending, true)
            .await
        {
            SpeakOutcome::Cancelled => return self.end_for_tokens(writer, transcripts, &mut pending).await,
            SpeakOutcome::Failed => {
                return self.technical_failure(writer, transcripts, &mut pending).await;
            }
            SpeakOutcome::Completed | SpeakOutcome::BargedIn => {}
        }
        if let Err(end) = self.set_state(CallState::Listening).await {
            return end;
        }

        let cancel = self.cancel.clone();
        let drain = self.drain.clone();
        let mut silence_deadline = Instant::now() + self.config.silence_timeout;

        loop {
            // Utterances buffered while a turn was processing dispatch
            // first, in arrival order.
            if let Some(transcript) = pending.pop_front() {
                if let Some(end) = self
                    .handle_turn(transcript.text, writer, transcripts, &mut pending)
                    .await
                {
                    return end;
                }
                silence_deadline = Instant::now() + self.config.silence_timeout;
                continue;
            }

            tokio::select! {
                () = cancel.cancelled() => return CallEnd::HungUp,

                () = drain.cancelled() => {
                    return self.transfer(CallEnd::Drained, writer, transcripts, &mut pending).await;
                }

                maybe = transcripts.recv() => match maybe {
                    Some(transcript) => {
                        self.session.record_activity();
                        self.mirror.on_activity(&self.session).await;
                        silence_deadline = Instant::now() + self.config.silence_timeout;

                        if transcript.is_final {
                            if let Some(end) = self
                                .handle_turn(transcript.text, writer, transcripts, &mut pending)
                                .await
                            {
                                return end;
                            }
                            silence_deadline = Instant::now() + self.config.silence_timeout;
                        }
                    }
                    None => {
                        // The engine exhausted its internal retries.
                        tracing::error!(call_id = %self.session.call_id(), "Transcript stream closed unexpectedly");
                        return self.technical_failure(writer, transcripts, &mut pending).await;
                    }
                },

                () = tokio::time::sleep_until(silence_deadline) => {
                    let count = self.session.record_silence_timeout();
                    self.mirror.on_activity(&self.session).await;
                    self.emit(CallEvent::SilencePrompt(count));

                    if count >= self.config.max_silence_timeouts {
                        tracing::info!(call_id = %self.session.call_id(), "Second silence timeout, ending call");
                        let _ = self
                            .speak_phrase(Phrase::Farewell, writer, transcripts, &mut pending, true)
                            .await;
                        return CallEnd::SilenceTimeout;
                    }

                    let _ = self
                        .speak_phrase(Phrase::StillThere, writer, transcripts, &mut pending, true)
                        .await;
                    silence_deadline = Instant::now() + self.config.silence_timeout;
                }
            }
        }
    }

    /// One finalized utterance through the agent and back out as audio.
    /// `Some(end)` means the call is over.
    async fn handle_turn<W: AsyncWrite + Unpin>(
        &mut self,
        utterance: String,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> Option<CallEnd> {
        let started = Instant::now();
        tracing::debug!(call_id = %self.session.call_id(), len = utterance.len(), "Dispatching user utterance");

        if let Err(end) = self.set_state(CallState::Processing).await {
            return Some(end);
        }

        let cancel = self.cancel.clone();
        let drain = self.drain.clone();
        let agent = Arc::clone(&self.deps.agent);

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Some(CallEnd::HungUp),
            () = drain.cancelled() => {
                return Some(self.transfer(CallEnd::Drained, writer, transcripts, pending).await);
            }
            outcome = agent.handle_user_turn(&mut self.session, &utterance) => outcome,
        };

        // Speech captured while tools were running: keep finalized
        // utterances for dispatch after this turn, drop stale interims so
        // they cannot barge the upcoming reply.
        buffer_finals(transcripts, pending, &mut self.session);

        match outcome {
            TurnOutcome::Reply(reply) => {
                if let Err(end) = self.set_state(CallState::Speaking).await {
                    return Some(end);
                }
                let spoke = self
                    .speak_reply(&reply, writer, transcripts, pending)
                    .await;
                match spoke {
                    SpeakOutcome::Completed | SpeakOutcome::BargedIn => {
                        if let Err(end) = self.set_state(CallState::Listening).await {
                            return Some(end);
                        }
                        metrics::histogram!("voxline_turn_seconds")
                            .record(started.elapsed().as_secs_f64());
                        self.emit(CallEvent::TurnCompleted);
                        None
                    }
                    SpeakOutcome::Cancelled => {
                        Some(self.end_for_tokens(writer, transcripts, pending).await)
                    }
                    SpeakOutcome::Failed => self.tts_failure(writer, transcripts, pending).await,
                }
            }
            TurnOutcome::Transfer => {
                Some(self.transfer(CallEnd::Transferred, writer, transcripts, pending).await)
            }
        }
    }

    // ── Failure flows ──────────────────────────────────────────────

    /// TTS failed mid-reply: cover with the cached "please wait" once,
    /// transfer if it keeps failing.
    async fn tts_failure<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> Option<CallEnd> {
        self.tts_failures += 1;
        if self.tts_failures >= 2 {
            tracing::error!(call_id = %self.session.call_id(), "Repeated synthesis failures, transferring");
            return Some(self.transfer(CallEnd::Transferred, writer, transcripts, pending).await);
        }

        tracing::warn!(call_id = %self.session.call_id(), "Synthesis failed, playing cached cover phrase");
        let _ = self
            .speak_phrase(Phrase::PleaseWait, writer, transcripts, pending, true)
            .await;
        match self.set_state(CallState::Listening).await {
            Ok(()) => None,
            Err(end) => Some(end),
        }
    }

    /// Unrecoverable provider failure: apologise from cache and transfer.
    async fn technical_failure<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> CallEnd {
        let _ = self
            .speak_phrase(Phrase::TechnicalIssue, writer, transcripts, pending, false)
            .await;
        self.transfer(CallEnd::Transferred, writer, transcripts, pending).await
    }

    /// Announce and enter the operator transfer. `end` distinguishes a
    /// model/failure transfer from a shutdown drain.
    async fn transfer<W: AsyncWrite + Unpin>(
        &mut self,
        end: CallEnd,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> CallEnd {
        if let Err(failed) = self.set_state(CallState::Transferring).await {
            return failed;
        }
        self.emit(CallEvent::TransferInitiated);
        metrics::counter!("voxline_transfers_total").increment(1);

        // The announcement must survive the drain token being set.
        let _ = self
            .speak_phrase(Phrase::Transfer, writer, transcripts, pending, false)
            .await;
        end
    }

    /// Map an interrupted playback to the token that interrupted it.
    async fn end_for_tokens<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> CallEnd {
        if self.drain.is_cancelled() && !self.cancel.is_cancelled() {
            self.transfer(CallEnd::Drained, writer, transcripts, pending).await
        } else {
            // Hangup, forced shutdown, or the connection itself failed.
            CallEnd::HungUp
        }
    }

    // ── Playback ───────────────────────────────────────────────────

    async fn speak_phrase<W: AsyncWrite + Unpin>(
        &mut self,
        phrase: Phrase,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
        watch_drain: bool,
    ) -> SpeakOutcome {
        match self.deps.tts.synthesize(phrase.text()).await {
            Ok(audio) => {
                self.pace_audio(
                    PacedSource::Single(Some(audio)),
                    writer,
                    transcripts,
                    pending,
                    watch_drain,
                )
                .await
            }
            Err(e) => {
                tracing::warn!(error = %e, phrase = ?phrase, "Failed to synthesize phrase");
                SpeakOutcome::Failed
            }
        }
    }

    async fn speak_reply<W: AsyncWrite + Unpin>(
        &mut self,
        text: &str,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
    ) -> SpeakOutcome {
        match self.deps.tts.synthesize_stream(text).await {
            Ok(chunks) => {
                self.pace_audio(
                    PacedSource::Stream(chunks),
                    writer,
                    transcripts,
                    pending,
                    true,
                )
                .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start reply synthesis");
                SpeakOutcome::Failed
            }
        }
    }

    /// Send audio at one 640-byte frame per 20 ms tick, watching for
    /// barge-in and cancellation between frames.
    ///
    /// Dropping `source` on barge-in discards every queued synthesis
    /// chunk; the TTS helper task notices and stops synthesizing.
    async fn pace_audio<W: AsyncWrite + Unpin>(
        &mut self,
        mut source: PacedSource,
        writer: &mut FrameWriter<W>,
        transcripts: &mut mpsc::Receiver<Transcript>,
        pending: &mut VecDeque<Transcript>,
        watch_drain: bool,
    ) -> SpeakOutcome {
        let cancel = self.cancel.clone();
        let drain = self.drain.clone();
        let mut ticker = tokio::time::interval(AUDIO_FRAME_DURATION);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut buffer = BytesMut::new();
        let mut source_done = false;
        let mut played_any = false;
        let mut stt_closed = false;

        loop {
            // Refill until a full frame is buffered (still interruptible).
            if !source_done && buffer.len() < AUDIO_FRAME_BYTES {
                tokio::select! {
                    () = cancel.cancelled() => return SpeakOutcome::Cancelled,
                    () = drain.cancelled(), if watch_drain => return SpeakOutcome::Cancelled,
                    maybe = transcripts.recv(), if !stt_closed => {
                        match maybe {
                            Some(t) => {
                                if self.note_barge(t, pending) {
                                    return SpeakOutcome::BargedIn;
                                }
                            }
                            None => stt_closed = true,
                        }
                    }
                    chunk = source.next() => match chunk {
                        Some(Ok(audio)) => buffer.extend_from_slice(&audio),
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Synthesis chunk failed mid-reply");
                            if !played_any && buffer.is_empty() {
                                return SpeakOutcome::Failed;
                            }
                            source_done = true;
                        }
                        None => source_done = true,
                    }
                }
                continue;
            }

            if buffer.is_empty() {
                return SpeakOutcome::Completed;
            }

            tokio::select! {
                () = cancel.cancelled() => return SpeakOutcome::Cancelled,
                () = drain.cancelled(), if watch_drain => return SpeakOutcome::Cancelled,
                maybe = transcripts.recv(), if !stt_closed => {
                    match maybe {
                        Some(t) => {
                            if self.note_barge(t, pending) {
                                return SpeakOutcome::BargedIn;
                            }
                        }
                        None => stt_closed = true,
                    }
                }
                _ = ticker.tick() => {
                    let frame = next_frame(&mut buffer);
                    if let Err(e) = writer.write_frame(&Frame::Audio(frame)).await {
                        tracing::warn!(error = %e, "Failed to write audio frame");
                        return SpeakOutcome::Cancelled;
                    }
                    played_any = true;
                    metrics::counter!("voxline_frames_out_total").increment(1);
                }
            }
        }
    }

    /// Caller speech during playback: record it, keep finals for the next
    /// turn, report barge-in.
    fn note_barge(&mut self, transcript: Transcript, pending: &mut VecDeque<Transcript>) -> bool {
        self.session.record_activity();
        if transcript.is_final {
            pending.push_back(transcript);
        }
        tracing::debug!(call_id = %self.session.call_id(), "Barge-in detected, stopping playback");
        self.emit(CallEvent::BargeIn);
        metrics::counter!("voxline_barge_ins_total").increment(1);
        true
    }

    // ── State + teardown helpers ───────────────────────────────────

    /// Transition the session, mirror the change, emit the event. An
    /// off-edge transition is a programming error and aborts the call.
    async fn set_state(&mut self, next: CallState) -> Result<(), CallEnd> {
        match self.session.transition(next) {
            Ok(()) => {
                self.emit(CallEvent::StateChanged(next));
                self.mirror.on_transition(&self.session).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(call_id = %self.session.call_id(), error = %e, "Fatal: transition outside the edge set");
                Err(CallEnd::Failed)
            }
        }
    }

    /// Final transition to `Ended` plus KV cleanup.
    async fn finish_session(&mut self) {
        if self.session.state() != CallState::Ended {
            if let Err(e) = self.session.transition(CallState::Ended) {
                // Unreachable by construction; keep the log in case.
                tracing::error!(call_id = %self.session.call_id(), error = %e, "Failed to end session");
            }
            self.emit(CallEvent::StateChanged(CallState::Ended));
        }
        self.mirror.remove(&self.session).await;
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}

/// Pull everything already buffered in the transcript channel: finals are
/// queued for dispatch, interims only refresh activity.
fn buffer_finals(
    transcripts: &mut mpsc::Receiver<Transcript>,
    pending: &mut VecDeque<Transcript>,
    session: &mut CallSession,
) {
    while let Ok(transcript) = transcripts.try_recv() {
        session.record_activity();
        if transcript.is_final {
            pending.push_back(transcript);
        }
    }
}

/// Cut the next wire frame off the buffer, zero-padding a trailing
/// partial frame to the full 20 ms.
fn next_frame(buffer: &mut BytesMut) -> Bytes {
    if buffer.len() >= AUDIO_FRAME_BYTES {
        buffer.split_to(AUDIO_FRAME_BYTES).freeze()
    } else {
        let mut frame = buffer.split().to_vec();
        frame.resize(AUDIO_FRAME_BYTES, 0);
        Bytes::from(frame)
    }
}

// ── Ingress activity ───────────────────────────────────────────────

/// Read frames until hangup, error, EOF, or cancellation; feed caller PCM
/// to the recognizer. Fires `cancel` on anything terminal so the dialogue
/// activity unwinds.
async fn ingress_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    feeder: SttFeeder,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = reader.read_frame() => frame,
        };

        match frame {
            Ok(Some(Frame::Audio(pcm))) => {
                metrics::counter!("voxline_frames_in_total").increment(1);
                if feeder.feed(pcm).is_err() {
                    tracing::debug!("Recognition session closed, stopping ingress");
                    break;
                }
            }
            Ok(Some(Frame::Hangup)) => {
                tracing::info!("Caller hung up");
                cancel.cancel();
                break;
            }
            Ok(Some(Frame::Error(message))) => {
                tracing::warn!(message = message.as_deref().unwrap_or(""), "Peer reported an error");
                cancel.cancel();
                break;
            }
            Ok(Some(Frame::Identify(_))) => {
                tracing::warn!("Identify frame mid-call, treating as protocol violation");
                cancel.cancel();
                break;
            }
            Ok(None) => {
                tracing::debug!("Connection closed by peer");
                cancel.cancel();
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Protocol error on ingress, terminating call");
                cancel.cancel();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_frame_cuts_full_frames() {
        let mut buffer = BytesMut::from(&[7u8; AUDIO_FRAME_BYTES + 10][..]);
        let frame = next_frame(&mut buffer);
        assert_eq!(frame.len(), AUDIO_FRAME_BYTES);
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn next_frame_pads_trailing_partial() {
        let mut buffer = BytesMut::from(&[7u8; 100][..]);
        let frame = next_frame(&mut buffer);
        assert_eq!(frame.len(), AUDIO_FRAME_BYTES);
        assert_eq!(&frame[..100], &[7u8; 100][..]);
        assert!(frame[100..].iter().all(|&b| b == 0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn paced_source_single_yields_once() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut source = PacedSource::Single(Some(Bytes::from_static(b"pcm")));
            assert!(source.next().await.is_some());
            assert!(source.next().await.is_none());
        });
    }
}
