//! Runtime settings and validation.
//!
//! Pure domain types with no infrastructure dependencies. The binary crate
//! layers sources (defaults ← config file ← environment ← flags) and calls
//! [`validate_settings`] once before wiring anything up.

use serde::{Deserialize, Serialize};

/// Default TCP port for the PBX audio-socket ingress.
pub const DEFAULT_AUDIOSOCKET_PORT: u16 = 9700;

/// Default port for the admin HTTP surface (health + metrics).
pub const DEFAULT_ADMIN_PORT: u16 = 9701;

/// Top-level settings, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub audiosocket: AudioSocketSettings,
    pub admin: AdminSettings,
    pub stt: SttSettings,
    pub tts: TtsSettings,
    pub llm: LlmSettings,
    pub store: StoreSettings,
    pub circuit: CircuitSettings,
    pub session: SessionSettings,
    pub silence: SilenceSettings,
    pub shutdown: ShutdownSettings,
}

/// PBX ingress listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioSocketSettings {
    /// TCP port the PBX connects to.
    pub port: u16,
}

impl Default for AudioSocketSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_AUDIOSOCKET_PORT,
        }
    }
}

/// Admin HTTP surface (health + metrics).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdminSettings {
    pub port: u16,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_ADMIN_PORT,
        }
    }
}

/// Speech-recognition provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SttSettings {
    /// Which recognizer backs the engine: `cloud` (streaming) or `local`
    /// (batch behind the energy gate).
    pub provider: SttProvider,
    /// Provider endpoint base URL.
    pub endpoint: String,
    pub api_key: String,
    /// Primary recognition language hint (BCP-47).
    pub primary_language: String,
    /// Additional language hints, in preference order.
    pub alternate_languages: Vec<String>,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            provider: SttProvider::Cloud,
            endpoint: String::new(),
            api_key: String::new(),
            primary_language: "uk-UA".to_string(),
            alternate_languages: vec!["ru-RU".to_string()],
        }
    }
}

/// Recognizer selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    #[default]
    Cloud,
    Local,
}

/// Speech-synthesis provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsSettings {
    pub endpoint: String,
    pub api_key: String,
    /// Voice identifier understood by the provider.
    pub voice: String,
    /// Speaking rate multiplier (0.5–2.0, 1.0 = normal).
    pub speaking_rate: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            voice: "uk-UA-Standard-A".to_string(),
            speaking_rate: 1.0,
        }
    }
}

/// Conversational agent limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// System prompt for the agent.
    pub system_prompt: String,
    /// Hard cap on tool calls within one user turn.
    pub max_tool_calls_per_turn: u8,
    /// Soft cap on history length; oldest non-system turns evict first.
    pub max_history_messages: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are the voice assistant of a tyre centre. Answer briefly, \
                            in at most three short sentences, and use the available tools \
                            for stock, orders and fitting appointments."
                .to_string(),
            max_tool_calls_per_turn: 5,
            max_history_messages: 40,
        }
    }
}

/// Backing-store HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    pub base_url: String,
    pub api_key: String,
    /// Per-attempt timeout in seconds.
    pub request_timeout_s: u64,
    /// Retries after the first attempt (429/503/network only).
    pub max_retries: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_timeout_s: 5,
            max_retries: 2,
        }
    }
}

/// Circuit breaker guarding the backing store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CircuitSettings {
    /// Consecutive failures that trip the breaker open.
    pub fail_max: u32,
    /// Seconds the breaker stays open before allowing one probe.
    pub open_duration_s: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            fail_max: 5,
            open_duration_s: 30,
        }
    }
}

/// Shared session KV store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Redis connection URL.
    pub redis_url: String,
    /// Session record TTL in seconds, refreshed on write.
    pub ttl_s: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ttl_s: 1800,
        }
    }
}

/// Silence policy while listening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SilenceSettings {
    /// Seconds without transcript activity before the prompt plays.
    pub timeout_s: u64,
    /// Consecutive timeouts that end the call.
    pub max_consecutive: u8,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            timeout_s: 10,
            max_consecutive: 2,
        }
    }
}

/// Graceful shutdown policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Seconds to wait for live calls to drain before force-closing.
    pub drain_s: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { drain_s: 30 }
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Port should be >= 1024 (privileged ports require root), got {0}")]
    InvalidPort(u16),

    #[error("Ingress and admin ports must differ, both are {0}")]
    PortCollision(u16),

    #[error("store.base_url must be set")]
    MissingStoreBaseUrl,

    #[error("store.api_key must be set")]
    MissingStoreApiKey,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("silence.max_consecutive must be at least 1, got {0}")]
    InvalidSilencePolicy(u8),

    #[error("tts.speaking_rate must be within 0.5–2.0, got {0}")]
    InvalidSpeakingRate(f32),

    #[error("llm.max_tool_calls_per_turn must be at least 1, got {0}")]
    InvalidToolCallCap(u8),
}

/// Validate settings values before any component is constructed.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    for port in [settings.audiosocket.port, settings.admin.port] {
        if port < 1024 {
            return Err(SettingsError::InvalidPort(port));
        }
    }
    if settings.audiosocket.port == settings.admin.port {
        return Err(SettingsError::PortCollision(settings.admin.port));
    }

    if settings.store.base_url.trim().is_empty() {
        return Err(SettingsError::MissingStoreBaseUrl);
    }
    if settings.store.api_key.trim().is_empty() {
        return Err(SettingsError::MissingStoreApiKey);
    }

    for (name, value) in [
        ("store.request_timeout_s", settings.store.request_timeout_s),
        ("circuit.open_duration_s", settings.circuit.open_duration_s),
        ("session.ttl_s", settings.session.ttl_s),
        ("silence.timeout_s", settings.silence.timeout_s),
        ("shutdown.drain_s", settings.shutdown.drain_s),
    ] {
        if value == 0 {
            return Err(SettingsError::ZeroDuration(name));
        }
    }

    if settings.silence.max_consecutive == 0 {
        return Err(SettingsError::InvalidSilencePolicy(0));
    }

    if !(0.5..=2.0).contains(&settings.tts.speaking_rate) {
        return Err(SettingsError::InvalidSpeakingRate(settings.tts.speaking_rate));
    }

    if settings.llm.max_tool_calls_per_turn == 0 {
        return Err(SettingsError::InvalidToolCallCap(0));
    }

    Ok(())
}
