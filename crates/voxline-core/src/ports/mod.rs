//! Port traits — the seams between the domain and its adapters.
//!
//! Each port lives in its own module together with the DTOs and the error
//! type it needs. Adapters (`voxline-speech`, `voxline-store`,
//! `voxline-session`, the agent's model adapter) implement these; the
//! pipeline and agent consume them and never see a concrete provider.

pub mod chat;
pub mod session_store;
pub mod stt;
pub mod tools;
pub mod tts;

pub use chat::{ChatModel, ChatModelError, ChatRequest, ModelOutcome};
pub use session_store::{SessionStore, SessionStoreError};
pub use stt::{SttConfig, SttEngine, SttError, SttFeed, SttFeeder, SttSession, Transcript};
pub use tools::{ToolHandler, ToolSpec};
pub use tts::{TtsEngine, TtsError};
