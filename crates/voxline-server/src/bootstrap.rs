//! Composition root.
//!
//! The ONLY place where concrete engines, clients and stores are
//! instantiated and wired into the ports. Everything downstream of here
//! sees trait objects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use voxline_agent::{Agent, AgentConfig, OpenAiChatModel, OpenAiConfig, ToolRouter};
use voxline_core::ports::{SessionStore, SttConfig, SttEngine, TtsEngine};
use voxline_core::settings::{Settings, SttProvider, validate_settings};
use voxline_session::{RedisSessionConfig, RedisSessionStore};
use voxline_speech::{
    CloudSttConfig, CloudSttEngine, CloudTtsConfig, CloudTtsEngine, LocalBatchSttEngine,
    LocalSttConfig, PhraseCache,
};
use voxline_store::{CircuitBreaker, HttpTransport, StoreApi, StoreClient, StoreConfig};

use crate::admin::AdminDeps;
use crate::pipeline::{PipelineConfig, PipelineDeps};
use crate::registry::CallRegistry;
use crate::server::ServerConfig;

/// Fully wired application context.
pub struct AppContext {
    pub settings: Settings,
    pub deps: PipelineDeps,
    pub pipeline_config: PipelineConfig,
    pub server_config: ServerConfig,
    pub registry: Arc<CallRegistry>,
    pub admin: Arc<AdminDeps>,
}

/// Wire the whole service from validated settings.
pub async fn bootstrap(settings: Settings) -> Result<AppContext> {
    validate_settings(&settings).context("invalid settings")?;

    let metrics_handle = install_metrics()?;

    // Process-global singletons: phrase cache, breaker, HTTP pools.
    let cache = Arc::new(PhraseCache::new());
    let tts: Arc<CloudTtsEngine> = Arc::new(
        CloudTtsEngine::new(
            CloudTtsConfig {
                endpoint: settings.tts.endpoint.clone(),
                api_key: settings.tts.api_key.clone(),
                voice: settings.tts.voice.clone(),
                speaking_rate: settings.tts.speaking_rate,
                sample_rate: 16_000,
                request_timeout: Duration::from_secs(10),
            },
            Arc::clone(&cache),
        )
        .context("building TTS engine")?,
    );
    if let Err(e) = tts.preload_hot_phrases().await {
        tracing::warn!(error = %e, "Hot-phrase preload failed, phrases will synthesize on demand");
    }

    let stt: Arc<dyn SttEngine> = match settings.stt.provider {
        SttProvider::Cloud => Arc::new(
            CloudSttEngine::new(CloudSttConfig::new(
                settings.stt.endpoint.clone(),
                settings.stt.api_key.clone(),
            ))
            .context("building cloud STT engine")?,
        ),
        SttProvider::Local => Arc::new(
            LocalBatchSttEngine::new(LocalSttConfig::new(settings.stt.endpoint.clone()))
                .context("building local STT engine")?,
        ),
    };

    // Backing store: one client, one breaker, the fixed tool catalog.
    let breaker = Arc::new(CircuitBreaker::new(
        settings.circuit.fail_max,
        Duration::from_secs(settings.circuit.open_duration_s),
    ));
    let store_client = StoreClient::new(
        Arc::new(HttpTransport::new().context("building store transport")?),
        breaker,
        StoreConfig {
            base_url: settings.store.base_url.clone(),
            api_key: settings.store.api_key.clone(),
            request_timeout: Duration::from_secs(settings.store.request_timeout_s),
            max_retries: settings.store.max_retries,
        },
    );
    let store = Arc::new(StoreApi::new(store_client));

    let mut router = ToolRouter::new();
    for handler in voxline_store::tools::all_handlers(Arc::clone(&store)) {
        router.register(handler).context("registering tool")?;
    }

    let model = Arc::new(
        OpenAiChatModel::new(OpenAiConfig {
            endpoint: settings.llm.endpoint.clone(),
            api_key: settings.llm.api_key.clone(),
            model: settings.llm.model.clone(),
        })
        .context("building chat model")?,
    );
    let agent = Arc::new(Agent::new(
        model,
        Arc::new(router),
        AgentConfig {
            system_prompt: settings.llm.system_prompt.clone(),
            max_tool_calls_per_turn: settings.llm.max_tool_calls_per_turn,
            max_history_messages: settings.llm.max_history_messages,
            model_timeout: Duration::from_secs(30),
        },
    ));

    let sessions: Arc<dyn SessionStore> = Arc::new(
        RedisSessionStore::connect(RedisSessionConfig {
            url: settings.session.redis_url.clone(),
            ttl: Duration::from_secs(settings.session.ttl_s),
        })
        .await
        .context("connecting to the session store")?,
    );

    let registry = Arc::new(CallRegistry::new());

    let deps = PipelineDeps {
        stt: Arc::clone(&stt),
        tts: tts.clone() as Arc<dyn TtsEngine>,
        agent,
        sessions: Arc::clone(&sessions),
    };

    let pipeline_config = PipelineConfig {
        stt: SttConfig {
            primary_language: settings.stt.primary_language.clone(),
            alternate_languages: settings.stt.alternate_languages.clone(),
            sample_rate: 16_000,
        },
        silence_timeout: Duration::from_secs(settings.silence.timeout_s),
        max_silence_timeouts: settings.silence.max_consecutive,
        mirror_min_interval: Duration::from_secs(5),
    };

    let server_config = ServerConfig {
        identify_deadline: Duration::from_secs(5),
        drain_deadline: Duration::from_secs(settings.shutdown.drain_s),
    };

    let admin = Arc::new(AdminDeps {
        registry: Arc::clone(&registry),
        sessions,
        stt,
        tts: tts as Arc<dyn TtsEngine>,
        store,
        metrics: metrics_handle,
    });

    Ok(AppContext {
        settings,
        deps,
        pipeline_config,
        server_config,
        registry,
        admin,
    })
}

/// Install the process-global Prometheus recorder.
fn install_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")
}
