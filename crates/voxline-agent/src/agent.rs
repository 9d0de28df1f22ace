//! The per-turn agentic loop.

use std::sync::Arc;
use std::time::Duration;

use voxline_core::CallSession;
use voxline_core::ports::{ChatModel, ChatModelError, ChatRequest, ModelOutcome};

use crate::router::ToolRouter;

/// Agent limits and prompt.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Hard cap on tool invocations within one user turn; the call past
    /// the cap terminates the turn with an operator transfer.
    pub max_tool_calls_per_turn: u8,
    /// History turns kept; the oldest evict before each model call.
    pub max_history_messages: usize,
    /// Per-invocation model deadline.
    pub model_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_tool_calls_per_turn: 5,
            max_history_messages: 40,
            model_timeout: Duration::from_secs(30),
        }
    }
}

/// How one user turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Speak this reply and return to listening.
    Reply(String),

    /// Hand the caller to a human operator; the turn is over.
    Transfer,
}

/// Drives one user turn to completion.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    router: Arc<ToolRouter>,
    config: AgentConfig,
}

impl Agent {
    #[must_use]
    pub fn new(model: Arc<dyn ChatModel>, router: Arc<ToolRouter>, config: AgentConfig) -> Self {
        Self {
            model,
            router,
            config,
        }
    }

    /// Handle one finalized caller utterance.
    ///
    /// Appends the utterance, then loops model → tools until the model
    /// produces text or a terminal condition fires. Model failures retry
    /// once; anything past that becomes an operator transfer so the caller
    /// is never left hanging.
    pub async fn handle_user_turn(
        &self,
        session: &mut CallSession,
        utterance: &str,
    ) -> TurnOutcome {
        let call_id = session.call_id();
        session.history_mut().push_user(utterance);

        let mut tool_calls_this_turn: u32 = 0;

        loop {
            session
                .history_mut()
                .evict_to(self.config.max_history_messages);

            let outcome = match self.invoke_model(session).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(call_id = %call_id, error = %e, "Model failed after retry, transferring");
                    return TurnOutcome::Transfer;
                }
            };

            match outcome {
                ModelOutcome::Text(reply) => {
                    session.history_mut().push_assistant_text(reply.clone());
                    return TurnOutcome::Reply(reply);
                }
                ModelOutcome::ToolCalls(invocations) => {
                    let mut results = Vec::with_capacity(invocations.len());

                    for invocation in &invocations {
                        tool_calls_this_turn += 1;
                        if tool_calls_this_turn > u32::from(self.config.max_tool_calls_per_turn) {
                            tracing::warn!(
                                call_id = %call_id,
                                cap = self.config.max_tool_calls_per_turn,
                                "Tool-call cap exceeded, transferring"
                            );
                            return TurnOutcome::Transfer;
                        }

                        if self.router.is_terminal(&invocation.tool_name) {
                            tracing::info!(call_id = %call_id, "Operator transfer requested by model");
                            return TurnOutcome::Transfer;
                        }

                        tracing::debug!(
                            call_id = %call_id,
                            tool = %invocation.tool_name,
                            "Dispatching tool call"
                        );
                        let result = self
                            .router
                            .dispatch(&invocation.tool_name, &invocation.arguments)
                            .await;
                        results.push((invocation.invocation_id.clone(), result));
                    }

                    session
                        .history_mut()
                        .push_tool_exchange(String::new(), invocations, results);
                }
            }
        }
    }

    /// One model invocation with the per-invocation deadline and a single
    /// retry on transient failure.
    async fn invoke_model(
        &self,
        session: &CallSession,
    ) -> Result<ModelOutcome, ChatModelError> {
        let specs = self.router.specs();
        let mut last_error = None;

        for attempt in 0..2 {
            let request = ChatRequest {
                system_prompt: &self.config.system_prompt,
                history: session.history().turns(),
                tools: &specs,
            };

            let result = tokio::time::timeout(self.config.model_timeout, self.model.complete(request))
                .await
                .map_or(
                    Err(ChatModelError::Timeout(self.config.model_timeout.as_secs())),
                    |inner| inner,
                );

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt == 0 => {
                    tracing::warn!(error = %e, "Model invocation failed, retrying once");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ChatModelError::Fatal("retry loop exhausted".into())))
    }
}
