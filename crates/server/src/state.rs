//! Application state shared across handlers.

use crate::balancer::Balancer;
use crate::forwarder::Forwarder;
use crate::lifecycle::LifecycleManager;
use crate::respcache::ResponseCache;
use keypool_core::config::{AppConfig, ProviderConfig};
use keypool_metadata::{HotCache, KeyStore};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The provider this instance fronts, resolved once at startup.
    pub provider: Option<Arc<ProviderConfig>>,
    /// Compiled cacheable-path patterns with their TTLs.
    cacheable: Arc<Vec<(Regex, u64)>>,
    /// Credential and statistics store.
    pub store: Arc<dyn KeyStore>,
    /// Hot cache fronting the store.
    pub cache: Arc<HotCache>,
    /// Lifecycle state machine and presenter gate.
    pub lifecycle: Arc<LifecycleManager>,
    /// Credential selector.
    pub balancer: Arc<Balancer>,
    /// Upstream HTTP client.
    pub forwarder: Arc<Forwarder>,
    /// Cache for configured read-only upstream paths.
    pub response_cache: Arc<ResponseCache>,
    started_at: Instant,
}

impl AppState {
    /// Create application state.
    ///
    /// Validates configuration: warnings are logged, fatal problems panic.
    /// Binary startup runs `AppConfig::validate` before this, so the panic
    /// path only fires for programmatic misuse.
    ///
    /// # Panics
    ///
    /// Panics if configuration validation fails with an error.
    pub fn new(config: AppConfig, store: Arc<dyn KeyStore>) -> Self {
        match config.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => panic!("Invalid configuration: {error}"),
        }

        let provider = config.provider().cloned().map(Arc::new);
        let cacheable: Vec<(Regex, u64)> = provider
            .as_deref()
            .map(|p| {
                p.cacheable_paths
                    .iter()
                    // Patterns were validated at startup; a bad one is skipped.
                    .filter_map(|c| Regex::new(&c.pattern).ok().map(|r| (r, c.ttl_seconds)))
                    .collect()
            })
            .unwrap_or_default();

        let cache = HotCache::new(store.clone(), config.stats.cache_expiry_seconds);
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            config.blocking.clone(),
            config.database.max_keys,
        ));

        Self {
            config: Arc::new(config),
            provider,
            cacheable: Arc::new(cacheable),
            store,
            cache,
            lifecycle,
            balancer: Arc::new(Balancer::new()),
            forwarder: Arc::new(Forwarder::new()),
            response_cache: Arc::new(ResponseCache::new()),
            started_at: Instant::now(),
        }
    }

    /// Seconds since this state was built.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// TTL for a cacheable GET path, if any pattern matches.
    pub fn cacheable_ttl(&self, path: &str) -> Option<Duration> {
        self.cacheable
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map(|(_, ttl)| Duration::from_secs(*ttl))
    }
}
