//! Integration tests for the per-call pipeline state machine.
//!
//! These drive [`CallPipeline`] over in-memory duplex connections with
//! mock STT/TTS/model backends. No network, no audio hardware, no real
//! providers — transcripts are injected by the test, synthesized "audio"
//! is a marker byte repeated, and the tokio clock is paused so pacing and
//! silence timers elapse in virtual time.
//!
//! # What is tested
//!
//! - Happy path: greeting → utterance → tool call → reply, with the state
//!   trace `Connected→Greeting→Listening→Processing→Speaking→Listening`
//! - Barge-in: playback stops on the first interim transcript
//! - Silence policy: prompt at the first timeout, farewell + end at the
//!   second, counter reset on speech
//! - Hangup, operator transfer, and shutdown drain
//! - Teardown: STT session stopped and KV record deleted on every path
//!
//! Audio markers: each synthesized phrase fills its frames with the first
//! byte of its text, so the test can tell greeting ('G'), "Are you still
//! there?" ('A'), farewell ('T'), transfer ('P') and replies apart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use voxline_agent::{Agent, AgentConfig, ToolRouter};
use voxline_core::ports::{
    ChatModel, ChatModelError, ChatRequest, ModelOutcome, SessionStore, SessionStoreError,
    SttConfig, SttEngine, SttError, SttFeed, SttFeeder, SttSession, ToolHandler, ToolSpec,
    Transcript, TtsEngine, TtsError,
};
use voxline_core::{
    CallId, CallSession, CallState, SessionSnapshot, ToolInvocation, ToolResult,
};
use voxline_protocol::{AUDIO_FRAME_BYTES, Frame, FrameReader, FrameWriter};
use voxline_server::{CallEnd, CallEvent, CallPipeline, PipelineConfig, PipelineDeps};
use voxline_speech::phrases::Phrase;

// ── Mock STT ───────────────────────────────────────────────────────

struct MockSttState {
    fed_frames: Mutex<usize>,
    stopped: AtomicBool,
}

struct MockFeed {
    state: Arc<MockSttState>,
}

impl SttFeed for MockFeed {
    fn feed(&self, _pcm: Bytes) -> Result<(), SttError> {
        *self.state.fed_frames.lock().unwrap() += 1;
        Ok(())
    }

    fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}

/// STT engine whose transcripts are injected by the test.
struct MockSttEngine {
    transcripts: Mutex<Option<mpsc::Receiver<Transcript>>>,
    state: Arc<MockSttState>,
}

impl MockSttEngine {
    /// Returns the engine, the transcript injection sender, and the shared
    /// state for post-run assertions.
    fn new() -> (Arc<Self>, mpsc::Sender<Transcript>, Arc<MockSttState>) {
        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(MockSttState {
            fed_frames: Mutex::new(0),
            stopped: AtomicBool::new(false),
        });
        (
            Arc::new(Self {
                transcripts: Mutex::new(Some(rx)),
                state: Arc::clone(&state),
            }),
            tx,
            state,
        )
    }
}

#[async_trait]
impl SttEngine for MockSttEngine {
    async fn start(&self, _config: SttConfig) -> Result<SttSession, SttError> {
        let transcripts = self
            .transcripts
            .lock()
            .unwrap()
            .take()
            .expect("mock STT supports one session per test");
        Ok(SttSession {
            feeder: SttFeeder::new(Arc::new(MockFeed {
                state: Arc::clone(&self.state),
            })),
            transcripts,
        })
    }

    async fn probe(&self) -> Result<(), SttError> {
        Ok(())
    }
}

// ── Mock TTS ───────────────────────────────────────────────────────

/// Deterministic synthesis: the audio is the text's first byte repeated
/// `text.len() * 64` times, so phrase identity is visible in the frames.
fn audio_for(text: &str) -> Bytes {
    let marker = text.as_bytes().first().copied().unwrap_or(0);
    Bytes::from(vec![marker; text.len() * 64])
}

fn frames_for(text: &str) -> usize {
    (text.len() * 64).div_ceil(AUDIO_FRAME_BYTES)
}

struct MockTts;

#[async_trait]
impl TtsEngine for MockTts {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        Ok(audio_for(text))
    }

    async fn synthesize_stream(
        &self,
        text: &str,
    ) -> Result<mpsc::Receiver<Result<Bytes, TtsError>>, TtsError> {
        let (tx, rx) = mpsc::channel(1);
        let audio = audio_for(text);
        tokio::spawn(async move {
            let _ = tx.send(Ok(audio)).await;
        });
        Ok(rx)
    }

    async fn probe(&self) -> Result<(), TtsError> {
        Ok(())
    }
}

// ── Mock session store ─────────────────────────────────────────────

#[derive(Default)]
struct MockStoreState {
    records: Mutex<HashMap<String, SessionSnapshot>>,
    deletes: Mutex<Vec<CallId>>,
}

#[derive(Clone, Default)]
struct MockSessionStore {
    state: Arc<MockStoreState>,
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn put(&self, snapshot: &SessionSnapshot) -> Result<(), SessionStoreError> {
        self.state
            .records
            .lock()
            .unwrap()
            .insert(snapshot.call_id.kv_key(), snapshot.clone());
        Ok(())
    }

    async fn get(&self, call_id: CallId) -> Result<Option<SessionSnapshot>, SessionStoreError> {
        Ok(self.state.records.lock().unwrap().get(&call_id.kv_key()).cloned())
    }

    async fn delete(&self, call_id: CallId) -> Result<(), SessionStoreError> {
        self.state.records.lock().unwrap().remove(&call_id.kv_key());
        self.state.deletes.lock().unwrap().push(call_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), SessionStoreError> {
        Ok(())
    }
}

// ── Scripted model + tools ─────────────────────────────────────────

enum Step {
    Text(&'static str),
    Tools(Vec<ToolInvocation>),
}

struct ScriptedModel {
    steps: Mutex<Vec<Step>>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _request: ChatRequest<'_>) -> Result<ModelOutcome, ChatModelError> {
        let mut steps = self.steps.lock().unwrap();
        assert!(!steps.is_empty(), "model invoked beyond script");
        Ok(match steps.remove(0) {
            Step::Text(reply) => ModelOutcome::Text(reply.to_string()),
            Step::Tools(calls) => ModelOutcome::ToolCalls(calls),
        })
    }
}

struct RecordingTool {
    spec: ToolSpec,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTool {
    fn new(name: &str, terminal: bool) -> Arc<Self> {
        Arc::new(Self {
            spec: ToolSpec {
                name: name.to_string(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object", "properties": {
                    "query": {"type": "string"}
                }}),
                terminal,
            },
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ToolHandler for RecordingTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: serde_json::Value) -> ToolResult {
        self.calls.lock().unwrap().push(arguments);
        ToolResult::success(serde_json::json!({"results": [{"id": "t-1"}, {"id": "t-2"}]}))
    }
}

// ── Harness ────────────────────────────────────────────────────────

struct Harness {
    stt_tx: mpsc::Sender<Transcript>,
    stt_state: Arc<MockSttState>,
    kv: Arc<MockStoreState>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    cancel: CancellationToken,
    drain: CancellationToken,
    call_id: CallId,
    pipeline: JoinHandle<CallEnd>,
    client_writer: FrameWriter<tokio::io::WriteHalf<DuplexStream>>,
    client_reader: FrameReader<tokio::io::ReadHalf<DuplexStream>>,
}

fn start_call(model_steps: Vec<Step>, tools: Vec<Arc<dyn ToolHandler>>) -> Harness {
    let (stt, stt_tx, stt_state) = MockSttEngine::new();
    let store = MockSessionStore::default();
    let kv = Arc::clone(&store.state);

    let mut router = ToolRouter::new();
    for tool in tools {
        router.register(tool).unwrap();
    }
    let agent = Arc::new(Agent::new(
        ScriptedModel::new(model_steps),
        Arc::new(router),
        AgentConfig::default(),
    ));

    let deps = PipelineDeps {
        stt,
        tts: Arc::new(MockTts),
        agent,
        sessions: Arc::new(store),
    };

    let call_id = CallId::new(Uuid::new_v4());
    let session = CallSession::new(call_id, None);
    let cancel = CancellationToken::new();
    let drain = CancellationToken::new();
    let (pipeline, events) = CallPipeline::new(
        deps,
        PipelineConfig::default(),
        session,
        cancel.clone(),
        drain.clone(),
    );

    let (server_end, client_end) = tokio::io::duplex(2048);
    let (server_read, server_write) = tokio::io::split(server_end);
    let (client_read, client_write) = tokio::io::split(client_end);

    let pipeline = tokio::spawn(pipeline.run(
        FrameReader::new(server_read),
        FrameWriter::new(server_write),
    ));

    Harness {
        stt_tx,
        stt_state,
        kv,
        events,
        cancel,
        drain,
        call_id,
        pipeline,
        client_writer: FrameWriter::new(client_write),
        client_reader: FrameReader::new(client_read),
    }
}

impl Harness {
    /// Read exactly `count` audio frames, asserting their marker byte.
    async fn expect_audio(&mut self, marker: u8, count: usize) {
        for i in 0..count {
            match self.client_reader.read_frame().await.unwrap() {
                Some(Frame::Audio(pcm)) => {
                    assert_eq!(pcm[0], marker, "frame {i} marker");
                }
                other => panic!("expected audio frame {i}, got {other:?}"),
            }
        }
    }

    async fn send_interim(&self, text: &str) {
        self.stt_tx
            .send(Transcript {
                text: text.to_string(),
                is_final: false,
                confidence: 0.4,
                detected_language: None,
            })
            .await
            .unwrap();
    }

    async fn send_final(&self, text: &str) {
        self.stt_tx
            .send(Transcript {
                text: text.to_string(),
                is_final: true,
                confidence: 0.9,
                detected_language: Some("uk-UA".to_string()),
            })
            .await
            .unwrap();
    }

    async fn hang_up(&mut self) {
        self.client_writer.write_frame(&Frame::Hangup).await.unwrap();
    }

    /// Drop the transcript sender so the pipeline sees the stream close.
    fn close_stt(&mut self) {
        let (tx, _rx) = mpsc::channel(1);
        self.stt_tx = tx;
    }

    async fn finish(mut self) -> (CallEnd, Vec<CallEvent>, Arc<MockStoreState>, Arc<MockSttState>) {
        let end = self.pipeline.await.unwrap();
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        (end, events, self.kv, self.stt_state)
    }
}

fn states(events: &[CallEvent]) -> Vec<CallState> {
    events
        .iter()
        .filter_map(|e| match e {
            CallEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn happy_path_product_search() {
    let search = RecordingTool::new("search_products", false);
    let mut harness = start_call(
        vec![
            Step::Tools(vec![ToolInvocation {
                invocation_id: "inv-1".into(),
                tool_name: "search_products".into(),
                arguments: serde_json::json!({"query": "215/55 R17 winter"}),
            }]),
            Step::Text("We have two winter options in stock."),
        ],
        vec![search.clone()],
    );

    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;

    harness.send_interim("do you have").await;
    harness.send_final("do you have 215 55 r17 winter tyres").await;

    let reply = "We have two winter options in stock.";
    harness.expect_audio(b'W', frames_for(reply)).await;

    harness.hang_up().await;
    let (end, events, kv, stt) = harness.finish().await;

    assert_eq!(end, CallEnd::HungUp);
    assert_eq!(
        states(&events),
        vec![
            CallState::Greeting,
            CallState::Listening,
            CallState::Processing,
            CallState::Speaking,
            CallState::Listening,
            CallState::Ended,
        ]
    );
    assert!(events.contains(&CallEvent::TurnCompleted));

    let calls = search.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["query"], "215/55 R17 winter");

    assert!(kv.records.lock().unwrap().is_empty(), "KV record must be deleted");
    assert!(stt.stopped.load(Ordering::SeqCst), "STT session must be stopped");
}

#[tokio::test(start_paused = true)]
async fn audio_frames_are_fed_to_the_recognizer() {
    let mut harness = start_call(vec![], vec![]);
    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;

    let pcm = Bytes::from(vec![0u8; AUDIO_FRAME_BYTES]);
    for _ in 0..5 {
        harness
            .client_writer
            .write_frame(&Frame::Audio(pcm.clone()))
            .await
            .unwrap();
    }

    // The fed-frame count is updated by the ingress task; yield until it
    // catches up.
    for _ in 0..100 {
        if *harness.stt_state.fed_frames.lock().unwrap() == 5 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(*harness.stt_state.fed_frames.lock().unwrap(), 5);

    harness.hang_up().await;
    let (end, ..) = harness.finish().await;
    assert_eq!(end, CallEnd::HungUp);
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_greeting_playback() {
    let mut harness = start_call(
        vec![Step::Text("Summer tyres work too.")],
        vec![],
    );

    // Read a few greeting frames, then the caller starts talking.
    harness.expect_audio(b'G', 3).await;
    harness.send_interim("actually I need").await;

    // Playback stops: at most the frames already buffered in the duplex
    // pipe still carry the greeting marker before the reply starts.
    harness.send_final("I need summer tyres").await;

    let greeting_total = frames_for(Phrase::Greeting.text());
    let mut greeting_seen = 3;
    loop {
        match harness.client_reader.read_frame().await.unwrap() {
            Some(Frame::Audio(pcm)) if pcm[0] == b'G' => greeting_seen += 1,
            Some(Frame::Audio(pcm)) if pcm[0] == b'S' => break,
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert!(
        greeting_seen < greeting_total,
        "greeting should be cut short ({greeting_seen}/{greeting_total})"
    );

    harness.hang_up().await;
    let (end, events, ..) = harness.finish().await;

    assert_eq!(end, CallEnd::HungUp);
    assert!(events.contains(&CallEvent::BargeIn));
    // The interrupted greeting leaves no assistant turn behind: the next
    // states show the barged utterance being processed as a fresh turn.
    assert_eq!(
        states(&events),
        vec![
            CallState::Greeting,
            CallState::Listening,
            CallState::Processing,
            CallState::Speaking,
            CallState::Listening,
            CallState::Ended,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_reply_playback() {
    let reply = "We close at six in the evening today.";
    let mut harness = start_call(
        vec![Step::Text(reply), Step::Text("Yes, we are open on Saturday.")],
        vec![],
    );

    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;
    harness.send_final("when do you close").await;

    // Let the reply start, then interrupt it.
    harness.expect_audio(b'W', 2).await;
    harness.send_interim("and on").await;
    harness.send_final("and on saturday").await;

    let mut reply_seen = 2;
    loop {
        match harness.client_reader.read_frame().await.unwrap() {
            Some(Frame::Audio(pcm)) if pcm[0] == b'W' => reply_seen += 1,
            Some(Frame::Audio(pcm)) if pcm[0] == b'Y' => break,
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert!(reply_seen < frames_for(reply));

    harness.hang_up().await;
    let (end, events, ..) = harness.finish().await;
    assert_eq!(end, CallEnd::HungUp);
    assert!(events.contains(&CallEvent::BargeIn));
}

#[tokio::test(start_paused = true)]
async fn two_silence_timeouts_end_the_call() {
    let mut harness = start_call(vec![], vec![]);

    // Greeting, then nothing: the prompt plays at 10 s, the farewell at
    // 20 s, then the call ends and the connection closes.
    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;
    harness
        .expect_audio(b'A', frames_for(Phrase::StillThere.text()))
        .await;
    harness
        .expect_audio(b'T', frames_for(Phrase::Farewell.text()))
        .await;

    let (end, events, kv, _) = harness.finish().await;

    assert_eq!(end, CallEnd::SilenceTimeout);
    assert!(events.contains(&CallEvent::SilencePrompt(1)));
    assert!(events.contains(&CallEvent::SilencePrompt(2)));
    assert!(kv.records.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn speech_resets_the_silence_counter() {
    let mut harness = start_call(vec![Step::Text("We are here!")], vec![]);

    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;
    // First timeout.
    harness
        .expect_audio(b'A', frames_for(Phrase::StillThere.text()))
        .await;

    // The caller speaks: the counter resets, so the next silence produces
    // prompt number 1 again rather than ending the call.
    harness.send_final("hello are you a robot").await;
    harness.expect_audio(b'W', frames_for("We are here!")).await;
    harness
        .expect_audio(b'A', frames_for(Phrase::StillThere.text()))
        .await;

    harness.hang_up().await;
    let (end, events, ..) = harness.finish().await;

    assert_eq!(end, CallEnd::HungUp);
    let prompts: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            CallEvent::SilencePrompt(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(prompts, vec![1, 1]);
}

#[tokio::test(start_paused = true)]
async fn model_transfer_plays_announcement_and_ends() {
    let transfer = RecordingTool::new("transfer_to_operator", true);
    let mut harness = start_call(
        vec![Step::Tools(vec![ToolInvocation {
            invocation_id: "inv-1".into(),
            tool_name: "transfer_to_operator".into(),
            arguments: serde_json::json!({}),
        }])],
        vec![transfer],
    );

    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;
    harness.send_final("give me a human please").await;
    harness
        .expect_audio(b'P', frames_for(Phrase::Transfer.text()))
        .await;

    let (end, events, kv, _) = harness.finish().await;

    assert_eq!(end, CallEnd::Transferred);
    assert!(events.contains(&CallEvent::TransferInitiated));
    let trace = states(&events);
    assert!(trace.contains(&CallState::Transferring));
    assert_eq!(*trace.last().unwrap(), CallState::Ended);
    assert!(kv.records.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn drain_hands_the_caller_to_an_operator() {
    let mut harness = start_call(vec![], vec![]);

    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;
    harness.drain.cancel();
    harness
        .expect_audio(b'P', frames_for(Phrase::Transfer.text()))
        .await;

    let (end, events, kv, stt) = harness.finish().await;

    assert_eq!(end, CallEnd::Drained);
    assert!(events.contains(&CallEvent::TransferInitiated));
    assert!(kv.records.lock().unwrap().is_empty());
    assert!(stt.stopped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn hangup_mid_greeting_tears_down_cleanly() {
    let mut harness = start_call(vec![], vec![]);

    harness.expect_audio(b'G', 2).await;
    harness.hang_up().await;

    let (end, events, kv, stt) = harness.finish().await;

    assert_eq!(end, CallEnd::HungUp);
    assert_eq!(*states(&events).last().unwrap(), CallState::Ended);
    assert!(kv.records.lock().unwrap().is_empty());
    assert!(stt.stopped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn forced_cancel_tears_down_cleanly() {
    let mut harness = start_call(vec![], vec![]);

    harness.expect_audio(b'G', 1).await;
    harness.cancel.cancel();

    let (end, _events, kv, stt) = harness.finish().await;

    assert_eq!(end, CallEnd::HungUp);
    assert!(kv.records.lock().unwrap().is_empty());
    assert!(stt.stopped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn stt_stream_collapse_transfers_the_caller() {
    let mut harness = start_call(vec![], vec![]);
    harness.expect_audio(b'G', frames_for(Phrase::Greeting.text())).await;

    // Engine retries exhausted: the transcript stream closes.
    harness.close_stt();

    harness
        .expect_audio(b'I', frames_for(Phrase::TechnicalIssue.text()))
        .await;
    harness
        .expect_audio(b'P', frames_for(Phrase::Transfer.text()))
        .await;

    let (end, events, ..) = harness.finish().await;
    assert_eq!(end, CallEnd::Transferred);
    assert!(events.contains(&CallEvent::TransferInitiated));
}
