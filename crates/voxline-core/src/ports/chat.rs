//! Conversational model port.
//!
//! One [`ChatModel::complete`] call is one model invocation: the agent
//! drives the tool loop, the adapter only translates to and from the
//! provider's wire format.

use async_trait::async_trait;
use thiserror::Error;

use crate::ports::tools::ToolSpec;
use crate::session::{DialogueTurn, ToolInvocation};

/// One model invocation.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [DialogueTurn],
    pub tools: &'a [ToolSpec],
}

/// What the model returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    /// A plain assistant reply.
    Text(String),

    /// One or more tool invocations, in declaration order.
    ToolCalls(Vec<ToolInvocation>),
}

/// Errors surfaced across the model port.
#[derive(Debug, Error)]
pub enum ChatModelError {
    /// Worth one retry (5xx, rate limit, connection reset).
    #[error("Transient model error: {0}")]
    Transient(String),

    /// The per-invocation deadline elapsed.
    #[error("Model invocation timed out after {0} s")]
    Timeout(u64),

    /// Not worth retrying (bad credentials, malformed request).
    #[error("Model request failed: {0}")]
    Fatal(String),
}

impl ChatModelError {
    /// Whether the agent should retry this invocation once.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Conversational model behind a provider-agnostic contract.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one model invocation over the current history.
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelOutcome, ChatModelError>;
}
