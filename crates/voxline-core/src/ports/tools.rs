//! Tool port — the contract between the agent and tool implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::ToolResult;

/// Declaration of one tool, advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Globally unique tool name.
    pub name: String,

    /// Natural-language description the model sees.
    pub description: String,

    /// JSON-schema object describing the accepted arguments. Used both in
    /// the model's tool catalog and for pre-dispatch validation.
    pub parameters: serde_json::Value,

    /// Terminal tools (operator transfer) end the turn: they produce a
    /// pipeline signal instead of a tool-result turn for the model.
    #[serde(default)]
    pub terminal: bool,
}

/// One registered tool implementation.
///
/// Handlers return [`ToolResult`] values for every outcome; failures are
/// data for the model, never errors that escape the router.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool's declaration (name, description, argument schema).
    fn spec(&self) -> &ToolSpec;

    /// Execute the tool. `arguments` has already been validated against
    /// [`ToolSpec::parameters`].
    async fn invoke(&self, arguments: serde_json::Value) -> ToolResult;
}
