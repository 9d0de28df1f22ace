//! OpenAI-compatible chat-completions adapter for the `ChatModel` port.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use voxline_core::ToolInvocation;
use voxline_core::ports::{ChatModel, ChatModelError, ChatRequest, ModelOutcome};
use voxline_core::session::DialogueTurn;

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL (`…/v1` is appended per endpoint).
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

/// Chat-completions client.
///
/// No request timeout is set on the client: the agent owns the
/// per-invocation deadline and applies it around `complete`.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, ChatModelError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ChatModelError::Fatal(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(json!({"role": "system", "content": request.system_prompt}));

        for turn in request.history {
            messages.push(wire_message(turn));
        }

        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

/// Map one history turn to the provider's message shape.
fn wire_message(turn: &DialogueTurn) -> Value {
    match turn {
        DialogueTurn::User { content } => json!({"role": "user", "content": content}),
        DialogueTurn::Assistant {
            content,
            tool_calls,
        } => {
            if tool_calls.is_empty() {
                json!({"role": "assistant", "content": content})
            } else {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.invocation_id,
                            "type": "function",
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
        }
        DialogueTurn::ToolResult {
            invocation_id,
            result,
        } => json!({
            "role": "tool",
            "tool_call_id": invocation_id,
            "content": serde_json::to_string(result).unwrap_or_default(),
        }),
    }
}

// ── Response shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl WireToolCall {
    fn into_invocation(self) -> ToolInvocation {
        // Malformed argument JSON is not an adapter error: it flows to the
        // router as a non-object value, fails schema validation there, and
        // the model gets a structured chance to self-correct.
        let arguments = serde_json::from_str(&self.function.arguments)
            .unwrap_or(Value::String(self.function.arguments));
        ToolInvocation {
            invocation_id: self.id,
            tool_name: self.function.name,
            arguments,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelOutcome, ChatModelError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| ChatModelError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("provider returned {status}: {body}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ChatModelError::Transient(message)
            } else {
                ChatModelError::Fatal(message)
            });
        }

        let completion: Completion = response
            .json()
            .await
            .map_err(|e| ChatModelError::Transient(e.to_string()))?;

        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(ChatModelError::Fatal("completion had no choices".into()));
        };

        if choice.message.tool_calls.is_empty() {
            Ok(ModelOutcome::Text(
                choice.message.content.unwrap_or_default(),
            ))
        } else {
            Ok(ModelOutcome::ToolCalls(
                choice
                    .message
                    .tool_calls
                    .into_iter()
                    .map(WireToolCall::into_invocation)
                    .collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxline_core::ToolResult;
    use voxline_core::ports::ToolSpec;

    #[test]
    fn history_maps_to_wire_roles() {
        let turns = [
            DialogueTurn::User {
                content: "hi".into(),
            },
            DialogueTurn::Assistant {
                content: String::new(),
                tool_calls: vec![ToolInvocation {
                    invocation_id: "inv-1".into(),
                    tool_name: "search_products".into(),
                    arguments: json!({"query": "winter"}),
                }],
            },
            DialogueTurn::ToolResult {
                invocation_id: "inv-1".into(),
                result: ToolResult::success(json!([])),
            },
        ];

        let wire: Vec<Value> = turns.iter().map(wire_message).collect();
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "search_products");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "inv-1");
    }

    #[test]
    fn tools_are_declared_as_functions() {
        let model = OpenAiChatModel::new(OpenAiConfig {
            endpoint: "http://127.0.0.1:1".into(),
            api_key: "k".into(),
            model: "test-model".into(),
        })
        .unwrap();

        let specs = [ToolSpec {
            name: "search_products".into(),
            description: "Search the catalog".into(),
            parameters: json!({"type": "object", "properties": {}}),
            terminal: false,
        }];
        let request = ChatRequest {
            system_prompt: "prompt",
            history: &[],
            tools: &specs,
        };

        let body = model.request_body(&request);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "search_products");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn malformed_tool_arguments_become_a_string_value() {
        let call = WireToolCall {
            id: "inv-9".into(),
            function: WireFunction {
                name: "search_products".into(),
                arguments: "{not json".into(),
            },
        };
        let invocation = call.into_invocation();
        assert!(invocation.arguments.is_string());
    }
}
