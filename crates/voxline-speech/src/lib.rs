//! Speech engines for voxline.
//!
//! Implements the `SttEngine` and `TtsEngine` ports from `voxline-core`:
//!
//! - [`CloudSttEngine`] — long-lived streaming recognition over chunked
//!   HTTP, with transparent reconnection before the provider's stream
//!   lifetime limit.
//! - [`LocalBatchSttEngine`] — energy-gated utterance segmentation in
//!   front of a locally hosted batch recognizer.
//! - [`CloudTtsEngine`] — HTTP synthesis behind a process-global phrase
//!   cache with preloaded hot phrases and sentence-aligned streaming.

pub mod phrases;
mod stt;
mod text;
mod tts;

pub use stt::cloud::{CloudSttConfig, CloudSttEngine};
pub use stt::local::{EnergyGateConfig, LocalBatchSttEngine, LocalSttConfig};
pub use tts::cache::PhraseCache;
pub use tts::{CloudTtsConfig, CloudTtsEngine};
