//! Call session domain model — state machine, dialogue history, tool calls.
//!
//! One [`CallSession`] is the authoritative runtime state of one inbound
//! call. It is owned exclusively by the pipeline driving that call; the
//! shared KV store only ever sees [`SessionSnapshot`] mirrors of it.
//!
//! The state machine:
//!
//! ```text
//!   Connected → Greeting → Listening ⇄ Processing → Speaking ⇄ Listening
//!                                                            ↘ Transferring → Ended
//!                              ↘ (2× silence timeout) → Ended
//!   (any state) → (hangup / fatal) → Ended
//! ```
//!
//! Transitions outside the enumerated edge set are programming errors and
//! surface as [`InvalidTransition`]; the pipeline treats them as fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Call identity ──────────────────────────────────────────────────

/// Opaque identifier of one call, supplied by the PBX in the Identify frame.
///
/// Also the correlation key for logs and the KV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Key of the mirrored session record in the shared KV store.
    #[must_use]
    pub fn kv_key(&self) -> String {
        format!("session:{}", self.0)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ── Call state machine ─────────────────────────────────────────────

/// Current state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// TCP connection accepted, Identify frame parsed.
    Connected,

    /// The canned greeting is playing.
    Greeting,

    /// Waiting for caller speech; the silence timer is armed.
    Listening,

    /// A finalized utterance is being handled by the agent (may include
    /// tool calls against the backing store).
    Processing,

    /// A synthesized reply is streaming back at real-time pacing.
    Speaking,

    /// Operator transfer initiated; terminal except for `Ended`.
    Transferring,

    /// Terminal state. All per-call resources are released.
    Ended,
}

impl CallState {
    /// Whether the edge `self → next` is in the declared transition set.
    ///
    /// `Ended` is reachable from every state (hangup and fatal errors),
    /// and `Transferring` from every live state after `Connected` — an
    /// operator hand-off can fire mid-greeting, mid-listening, while
    /// tools run, or while a reply plays. Nothing leaves `Ended`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use CallState::{
            Connected, Ended, Greeting, Listening, Processing, Speaking, Transferring,
        };

        if self == Ended {
            return false;
        }
        if next == Ended {
            return true;
        }

        matches!(
            (self, next),
            (Connected, Greeting)
                | (Greeting, Listening | Transferring)
                | (Listening, Processing | Transferring)
                | (Processing, Speaking | Transferring)
                | (Speaking, Listening | Transferring)
        )
    }

    /// Stable label used in the KV record and in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Greeting => "greeting",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Transferring => "transferring",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted a state transition outside the declared edge set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid call state transition {from} → {to}")]
pub struct InvalidTransition {
    pub from: CallState,
    pub to: CallState,
}

// ── Tool invocations ───────────────────────────────────────────────

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Model-assigned invocation id; the matching result echoes it.
    pub invocation_id: String,

    /// Globally unique tool name from the registered catalog.
    pub tool_name: String,

    /// Structured arguments, validated against the tool's schema before
    /// dispatch.
    pub arguments: serde_json::Value,
}

/// Structured result of one tool invocation.
///
/// Failures are values the model can read and react to, never exceptions:
/// `{ok: true, data}` or `{ok: false, kind, message}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Stable error discriminant (`"unavailable"`, `"invalid_arguments"`, …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Human-readable message the model can relay or self-correct from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolResult {
    #[must_use]
    pub const fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            kind: None,
            message: None,
        }
    }

    #[must_use]
    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            kind: Some(kind.into()),
            message: Some(message.into()),
        }
    }
}

// ── Dialogue history ───────────────────────────────────────────────

/// One turn in the dialogue history handed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum DialogueTurn {
    /// A finalized caller utterance.
    User { content: String },

    /// A model reply; `tool_calls` is non-empty when the model requested
    /// tools instead of (or alongside) text.
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },

    /// The result of one tool invocation, echoing its id.
    ToolResult {
        invocation_id: String,
        result: ToolResult,
    },
}

impl DialogueTurn {
    /// Whether this turn is an assistant turn carrying tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        matches!(self, Self::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    }
}

/// Ordered dialogue history with the tool-call pairing invariant.
///
/// Invariant: an assistant turn carrying tool calls is immediately followed
/// by its matching tool-result turns, in the order the calls were declared.
/// [`DialogueHistory::evict_to`] preserves the invariant by always evicting
/// such a group as a unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogueHistory {
    turns: Vec<DialogueTurn>,
}

impl DialogueHistory {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    #[must_use]
    pub fn turns(&self) -> &[DialogueTurn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(DialogueTurn::User {
            content: content.into(),
        });
    }

    pub fn push_assistant_text(&mut self, content: impl Into<String>) {
        self.turns.push(DialogueTurn::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        });
    }

    /// Append an assistant turn with tool calls and the matching results,
    /// as one atomic group so the pairing invariant can never be observed
    /// broken.
    ///
    /// Results must be in invocation order; the caller (the agent loop)
    /// guarantees this.
    pub fn push_tool_exchange(
        &mut self,
        content: impl Into<String>,
        tool_calls: Vec<ToolInvocation>,
        results: Vec<(String, ToolResult)>,
    ) {
        debug_assert_eq!(tool_calls.len(), results.len());
        self.turns.push(DialogueTurn::Assistant {
            content: content.into(),
            tool_calls,
        });
        for (invocation_id, result) in results {
            self.turns.push(DialogueTurn::ToolResult {
                invocation_id,
                result,
            });
        }
    }

    /// Evict oldest turns until at most `max_turns` remain.
    ///
    /// An assistant turn with tool calls is dropped together with its
    /// tool-result turns; plain user and assistant turns evict one by one.
    /// The system prompt is not part of the history and is never affected.
    pub fn evict_to(&mut self, max_turns: usize) {
        while self.turns.len() > max_turns {
            let group = match &self.turns[0] {
                DialogueTurn::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                    1 + tool_calls.len()
                }
                _ => 1,
            };
            let drop = group.min(self.turns.len());
            self.turns.drain(..drop);
            tracing::debug!(dropped = drop, remaining = self.turns.len(), "Evicted history turns");
        }
    }
}

// ── Call session ───────────────────────────────────────────────────

/// The authoritative runtime state of one call.
///
/// Mutated only by the pipeline that owns it; mirrored to the KV store via
/// [`CallSession::snapshot`].
#[derive(Debug, Clone)]
pub struct CallSession {
    call_id: CallId,

    /// Caller phone number resolved before pipeline start; may be absent.
    caller_id: Option<String>,

    state: CallState,
    history: DialogueHistory,

    /// Consecutive silence timeouts; reset by any caller utterance.
    consecutive_timeouts: u8,

    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl CallSession {
    #[must_use]
    pub fn new(call_id: CallId, caller_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id,
            caller_id,
            state: CallState::Connected,
            history: DialogueHistory::new(),
            consecutive_timeouts: 0,
            started_at: now,
            last_activity_at: now,
        }
    }

    #[must_use]
    pub const fn call_id(&self) -> CallId {
        self.call_id
    }

    #[must_use]
    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    #[must_use]
    pub const fn history(&self) -> &DialogueHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut DialogueHistory {
        &mut self.history
    }

    #[must_use]
    pub const fn consecutive_timeouts(&self) -> u8 {
        self.consecutive_timeouts
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Transition to `next`, enforcing the declared edge set.
    pub fn transition(&mut self, next: CallState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(call_id = %self.call_id, from = %self.state, to = %next, "Call state transition");
        self.state = next;
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// Record caller activity (audio or transcript), refreshing the
    /// activity timestamp and resetting the silence-timeout counter.
    pub fn record_activity(&mut self) {
        self.consecutive_timeouts = 0;
        self.last_activity_at = Utc::now();
    }

    /// Record one silence timeout; returns the new consecutive count.
    pub fn record_silence_timeout(&mut self) -> u8 {
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        self.last_activity_at = Utc::now();
        self.consecutive_timeouts
    }

    /// The KV-mirrored view of this session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id,
            state: self.state,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            consecutive_timeouts: self.consecutive_timeouts,
        }
    }
}

/// The JSON shape persisted at `session:{call_id}`.
///
/// No audio and no transcripts are ever mirrored; the KV record exists for
/// cross-process observability and crash cleanup only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub call_id: CallId,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub consecutive_timeouts: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CallState; 7] = [
        CallState::Connected,
        CallState::Greeting,
        CallState::Listening,
        CallState::Processing,
        CallState::Speaking,
        CallState::Transferring,
        CallState::Ended,
    ];

    fn call_id() -> CallId {
        CallId::new(Uuid::nil())
    }

    #[test]
    fn declared_edges_are_exactly_the_allowed_set() {
        use CallState::{
            Connected, Ended, Greeting, Listening, Processing, Speaking, Transferring,
        };

        let allowed = [
            (Connected, Greeting),
            (Greeting, Listening),
            (Greeting, Transferring),
            (Listening, Processing),
            (Listening, Transferring),
            (Processing, Speaking),
            (Processing, Transferring),
            (Speaking, Listening),
            (Speaking, Transferring),
        ];

        for from in ALL_STATES {
            for to in ALL_STATES {
                let expected = (from != Ended && to == Ended)
                    || allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "edge {from} → {to}"
                );
            }
        }
    }

    #[test]
    fn ended_is_terminal() {
        for to in ALL_STATES {
            assert!(!CallState::Ended.can_transition_to(to));
        }
    }

    #[test]
    fn session_rejects_invalid_transition() {
        let mut session = CallSession::new(call_id(), None);
        let err = session.transition(CallState::Speaking).unwrap_err();
        assert_eq!(err.from, CallState::Connected);
        assert_eq!(err.to, CallState::Speaking);
        // State is unchanged after a rejected transition.
        assert_eq!(session.state(), CallState::Connected);
    }

    #[test]
    fn session_walks_the_happy_path() {
        let mut session = CallSession::new(call_id(), Some("+380501112233".into()));
        for next in [
            CallState::Greeting,
            CallState::Listening,
            CallState::Processing,
            CallState::Speaking,
            CallState::Listening,
            CallState::Ended,
        ] {
            session.transition(next).unwrap();
        }
        assert_eq!(session.state(), CallState::Ended);
    }

    #[test]
    fn silence_timeouts_count_and_reset() {
        let mut session = CallSession::new(call_id(), None);
        assert_eq!(session.record_silence_timeout(), 1);
        assert_eq!(session.record_silence_timeout(), 2);
        session.record_activity();
        assert_eq!(session.consecutive_timeouts(), 0);
    }

    #[test]
    fn tool_exchange_keeps_results_adjacent() {
        let mut history = DialogueHistory::new();
        history.push_user("any winter tyres?");
        let call = ToolInvocation {
            invocation_id: "inv-1".into(),
            tool_name: "search_products".into(),
            arguments: serde_json::json!({"query": "winter"}),
        };
        history.push_tool_exchange(
            "",
            vec![call],
            vec![("inv-1".into(), ToolResult::success(serde_json::json!([])))],
        );

        let turns = history.turns();
        assert!(turns[1].has_tool_calls());
        assert!(matches!(
            &turns[2],
            DialogueTurn::ToolResult { invocation_id, .. } if invocation_id == "inv-1"
        ));
    }

    #[test]
    fn eviction_drops_tool_groups_as_a_unit() {
        let mut history = DialogueHistory::new();
        let calls: Vec<ToolInvocation> = (0..2)
            .map(|i| ToolInvocation {
                invocation_id: format!("inv-{i}"),
                tool_name: "search_products".into(),
                arguments: serde_json::Value::Null,
            })
            .collect();
        let results = calls
            .iter()
            .map(|c| {
                (
                    c.invocation_id.clone(),
                    ToolResult::success(serde_json::Value::Null),
                )
            })
            .collect();
        history.push_tool_exchange("", calls, results); // 3 turns
        history.push_user("u1");
        history.push_assistant_text("a1");

        // Evicting below the group size removes the whole group, never a
        // dangling prefix of it.
        history.evict_to(2);
        assert_eq!(history.len(), 2);
        assert!(matches!(history.turns()[0], DialogueTurn::User { .. }));
    }

    #[test]
    fn eviction_drops_plain_turns_individually() {
        let mut history = DialogueHistory::new();
        history.push_user("u1");
        history.push_assistant_text("a1");
        history.push_user("u2");
        history.evict_to(2);
        assert_eq!(history.len(), 2);
        assert!(matches!(
            &history.turns()[0],
            DialogueTurn::Assistant { content, .. } if content == "a1"
        ));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let session = CallSession::new(call_id(), None);
        let snapshot = session.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn kv_key_is_namespaced_by_call_id() {
        assert_eq!(
            call_id().kv_key(),
            "session:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn tool_result_wire_shape() {
        let ok = serde_json::to_value(ToolResult::success(serde_json::json!({"n": 1}))).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "data": {"n": 1}}));

        let err = serde_json::to_value(ToolResult::failure("unavailable", "backend down")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"ok": false, "kind": "unavailable", "message": "backend down"})
        );
    }
}
