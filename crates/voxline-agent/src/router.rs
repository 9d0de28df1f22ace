//! Tool router — name → handler dispatch with argument validation.
//!
//! Registration happens once at startup; dispatch is an O(1) map lookup.
//! Every dispatch outcome is a [`ToolResult`] value: unknown tools,
//! schema violations, and handler failures all come back as structured
//! `{ok: false}` results the model can read.

use std::collections::HashMap;
use std::sync::Arc;

use voxline_core::ToolResult;
use voxline_core::ports::{ToolHandler, ToolSpec};

use crate::validate::validate_arguments;

/// Errors raised at registration time only. Dispatch never errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// Registry of the fixed tool catalog.
#[derive(Default)]
pub struct ToolRouter {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one handler. Tool names are globally unique.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), RouterError> {
        let name = handler.spec().name.clone();
        if self.handlers.contains_key(&name) {
            return Err(RouterError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Declarations for the model's tool catalog, sorted by name so the
    /// prompt is stable across restarts.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> =
            self.handlers.values().map(|h| h.spec().clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Whether `name` is a registered terminal tool (operator transfer).
    #[must_use]
    pub fn is_terminal(&self, name: &str) -> bool {
        self.handlers.get(name).is_some_and(|h| h.spec().terminal)
    }

    /// Validate and run one invocation.
    pub async fn dispatch(&self, name: &str, arguments: &serde_json::Value) -> ToolResult {
        let Some(handler) = self.handlers.get(name) else {
            return ToolResult::failure("unknown_tool", format!("no tool named '{name}'"));
        };

        if let Err(message) = validate_arguments(&handler.spec().parameters, arguments) {
            tracing::debug!(tool = %name, %message, "Rejected tool arguments");
            return ToolResult::failure("invalid_arguments", message);
        }

        handler.invoke(arguments.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool {
        spec: ToolSpec,
    }

    impl EchoTool {
        fn new(name: &str, terminal: bool) -> Self {
            Self {
                spec: ToolSpec {
                    name: name.to_string(),
                    description: "echo".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {"value": {"type": "string"}},
                        "required": ["value"]
                    }),
                    terminal,
                },
            }
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn invoke(&self, arguments: serde_json::Value) -> ToolResult {
            ToolResult::success(arguments)
        }
    }

    fn router() -> ToolRouter {
        let mut router = ToolRouter::new();
        router.register(Arc::new(EchoTool::new("echo", false))).unwrap();
        router
            .register(Arc::new(EchoTool::new("transfer_to_operator", true)))
            .unwrap();
        router
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut router = router();
        let err = router
            .register(Arc::new(EchoTool::new("echo", false)))
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateTool(name) if name == "echo"));
    }

    #[test]
    fn specs_are_sorted_by_name() {
        let names: Vec<String> = router().specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "transfer_to_operator"]);
    }

    #[test]
    fn terminal_flag_is_exposed() {
        let router = router();
        assert!(router.is_terminal("transfer_to_operator"));
        assert!(!router.is_terminal("echo"));
        assert!(!router.is_terminal("absent"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_structured_failure() {
        let result = router().dispatch("nope", &json!({})).await;
        assert!(!result.ok);
        assert_eq!(result.kind.as_deref(), Some("unknown_tool"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_a_structured_failure() {
        let result = router().dispatch("echo", &json!({"value": 7})).await;
        assert!(!result.ok);
        assert_eq!(result.kind.as_deref(), Some("invalid_arguments"));
        assert!(result.message.unwrap().contains("string"));
    }

    #[tokio::test]
    async fn valid_dispatch_reaches_the_handler() {
        let result = router().dispatch("echo", &json!({"value": "hi"})).await;
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["value"], "hi");
    }
}
