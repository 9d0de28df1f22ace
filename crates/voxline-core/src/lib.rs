//! Core domain types and port traits for the voxline call handler.
//!
//! This crate is the hexagonal centre of the workspace: it defines the call
//! session state machine, the dialogue history, the tool invocation model,
//! the runtime settings, and the port traits that adapter crates implement
//! (`SttEngine`, `TtsEngine`, `ChatModel`, `ToolHandler`, `SessionStore`).
//!
//! It depends on no infrastructure crate. Adapters depend on it; it depends
//! on none of them.

pub mod ports;
pub mod session;
pub mod settings;

pub use session::{
    CallId, CallSession, CallState, DialogueHistory, DialogueTurn, InvalidTransition,
    SessionSnapshot, ToolInvocation, ToolResult,
};
pub use settings::{Settings, SettingsError};
