//! Tool-calling conversational agent.
//!
//! [`Agent`] drives one user turn to completion against the `ChatModel`
//! port: it appends the utterance, invokes the model, dispatches any tool
//! calls through the [`ToolRouter`], and loops until the model produces a
//! spoken reply or a terminal signal. Hard caps bound both the tool-call
//! fan-out within a turn and the history length across turns.

mod agent;
mod openai;
mod router;
mod validate;

pub use agent::{Agent, AgentConfig, TurnOutcome};
pub use openai::{OpenAiChatModel, OpenAiConfig};
pub use router::{RouterError, ToolRouter};
