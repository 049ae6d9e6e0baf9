use std::path::PathBuf;
use std::sync::Arc;
use stitch_core::catalog::Catalog;
use stitch_core::dispatch::{Dispatcher, StandardTransport};
use tokio::sync::Semaphore;

pub const DEFAULT_DISPATCH_QUEUE_DEPTH: usize = 64;

/// Control-plane configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bearer token; unset disables authentication (development mode).
    pub api_key: Option<String>,
    /// `owner/repo` receiving dispatch events.
    pub template_repo: Option<String>,
    pub dispatch_token: Option<String>,
    /// Webhook API base; override for enterprise hosts.
    pub dispatch_api_base: String,
    pub state_dir: PathBuf,
    pub max_compose_seconds: u64,
    pub dispatch_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            template_repo: None,
            dispatch_token: None,
            dispatch_api_base: stitch_core::dispatch::DEFAULT_DISPATCH_API_BASE.to_string(),
            state_dir: PathBuf::from(stitch_core::paths::DEFAULT_STATE_DIR),
            max_compose_seconds: stitch_core::engine::DEFAULT_MAX_COMPOSE_SECONDS,
            dispatch_queue_depth: DEFAULT_DISPATCH_QUEUE_DEPTH,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: non_empty_var("API_KEY"),
            template_repo: non_empty_var("TEMPLATE_REPO"),
            dispatch_token: non_empty_var("DISPATCH_TOKEN"),
            dispatch_api_base: non_empty_var("DISPATCH_API_BASE")
                .unwrap_or(defaults.dispatch_api_base),
            state_dir: non_empty_var("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            max_compose_seconds: non_empty_var("MAX_COMPOSE_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_compose_seconds),
            dispatch_queue_depth: non_empty_var("DISPATCH_QUEUE_DEPTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dispatch_queue_depth),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Shared application state passed to all route handlers. Everything here is
/// a read-only snapshot; handlers never mutate shared state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub config: Arc<ServerConfig>,
    pub dispatcher: Arc<Dispatcher<StandardTransport>>,
    /// Bounded work queue serializing downstream dispatch; overflow is 503.
    pub dispatch_gate: Arc<Semaphore>,
}

impl AppState {
    pub fn new(catalog: Catalog, config: ServerConfig) -> Self {
        let transport = StandardTransport::from_env(
            config.template_repo.clone(),
            config.dispatch_token.clone(),
            &config.dispatch_api_base,
        );
        let dispatcher = Dispatcher::new(transport).with_log_dir(&config.state_dir);
        let gate = Semaphore::new(config.dispatch_queue_depth);
        Self {
            catalog: Arc::new(catalog),
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            dispatch_gate: Arc::new(gate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_dev_mode() {
        let config = ServerConfig::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.max_compose_seconds, 120);
        assert_eq!(config.dispatch_queue_depth, 64);
        assert_eq!(
            config.state_dir,
            PathBuf::from(stitch_core::paths::DEFAULT_STATE_DIR)
        );
    }

    #[test]
    fn state_without_credentials_has_unconfigured_dispatcher() {
        let state = AppState::new(Catalog::empty(), ServerConfig::default());
        assert!(!state.dispatcher.is_configured());
    }
}
