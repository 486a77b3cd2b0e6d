pub mod api;
pub mod channel;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::HttpCaseService;
use crate::channel::{spawn_event_channel, ChannelHandle};
use crate::config::AppConfig;
use crate::db::{DurableCache, SqliteDurableCache};
use crate::pipeline::case_processing::{
    CaseOrchestrator, CaseSession, OrchestratorConfig, ServiceError, SessionSeed,
};

/// Initialize tracing once per process. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Open the durable cache, degrading to an in-memory cache when the file
/// cannot be opened. The cache is best-effort either way.
pub fn open_cache(config: &AppConfig) -> Arc<dyn DurableCache> {
    if let Err(e) = config.ensure_cache_dir() {
        tracing::warn!(error = %e, "Cache directory unavailable");
    }
    match SqliteDurableCache::open(&config.cache_path) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::warn!(path = %config.cache_path.display(), error = %e, "Durable cache unavailable; using memory only");
            match SqliteDurableCache::in_memory() {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!(error = %e, "In-memory cache unavailable; caching disabled");
                    Arc::new(db::NoCache)
                }
            }
        }
    }
}

/// A running case session with its live event channel.
pub struct LiveSession {
    pub session: CaseSession,
    pub channel: ChannelHandle,
}

impl LiveSession {
    /// Detach the channel, stop the session, and keep its state for reuse.
    pub async fn close(self) -> Result<SessionSeed, pipeline::case_processing::CaseError> {
        self.channel.shutdown();
        self.session.close().await
    }
}

/// Wire the REST client, durable cache, and event channel into a session.
pub fn start_live_session(
    config: &AppConfig,
    case_id: &str,
    seed: SessionSeed,
) -> Result<LiveSession, ServiceError> {
    let service = Arc::new(HttpCaseService::from_config(config)?);
    let cache = open_cache(config);
    let (channel, events) = spawn_event_channel(&config.events_url, case_id, config.reconnect.clone());

    let orchestrator = CaseOrchestrator::new(
        case_id,
        service,
        cache,
        Arc::new(channel.clone()),
        OrchestratorConfig {
            management_id: config.management_id.clone(),
            upload: config.upload.clone(),
        },
    );
    tracing::info!(case_id, api = %config.api_base_url, events = %config.events_url, "Starting case session");
    Ok(LiveSession {
        session: CaseSession::start(orchestrator, seed, events),
        channel,
    })
}
