//! Configuration types shared across crates.

use crate::validation::ValidationRule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the provider (from `providers`) this instance fronts.
    #[serde(default)]
    pub provider: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            provider: None,
        }
    }
}

/// Credential database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Pool capacity gate: auto-enrollment stops once this many credentials
    /// are persisted.
    #[serde(default = "default_max_keys")]
    pub max_keys: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/keypool.db")
}

fn default_max_keys() -> u64 {
    200
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_keys: default_max_keys(),
        }
    }
}

/// Credential blocking and backoff policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// Minimum seconds between admissions for the same presented credential.
    #[serde(default = "default_presented_key_rate_limit_seconds")]
    pub presented_key_rate_limit_seconds: u64,
    /// Block duration after an upstream 401, in minutes.
    #[serde(default = "default_auth_failure_block_minutes")]
    pub auth_failure_block_minutes: u64,
    /// Consecutive 401s before the credential is deleted from the pool.
    #[serde(default = "default_auth_failure_delete_threshold")]
    pub auth_failure_delete_threshold: u32,
    /// Base of the exponential 429 backoff, in minutes. The n-th consecutive
    /// throttle blocks for 2^(n-1) times this.
    #[serde(default = "default_throttle_backoff_base_minutes")]
    pub throttle_backoff_base_minutes: u64,
    /// Consecutive 429s before the credential is deleted from the pool.
    #[serde(default = "default_throttle_delete_threshold")]
    pub throttle_delete_threshold: u32,
}

fn default_presented_key_rate_limit_seconds() -> u64 {
    1
}

fn default_auth_failure_block_minutes() -> u64 {
    1440 // 24 hours
}

fn default_auth_failure_delete_threshold() -> u32 {
    3
}

fn default_throttle_backoff_base_minutes() -> u64 {
    1
}

fn default_throttle_delete_threshold() -> u32 {
    10
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            presented_key_rate_limit_seconds: default_presented_key_rate_limit_seconds(),
            auth_failure_block_minutes: default_auth_failure_block_minutes(),
            auth_failure_delete_threshold: default_auth_failure_delete_threshold(),
            throttle_backoff_base_minutes: default_throttle_backoff_base_minutes(),
            throttle_delete_threshold: default_throttle_delete_threshold(),
        }
    }
}

impl BlockingConfig {
    /// Presenter rate-limit window as a Duration.
    pub fn presenter_interval(&self) -> Duration {
        Duration::from_secs(self.presented_key_rate_limit_seconds)
    }

    /// Validate blocking configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.auth_failure_delete_threshold == 0 {
            return Err("blocking.auth_failure_delete_threshold cannot be 0 \
                 (every credential would be deleted on its first 401)"
                .to_string());
        }
        if self.throttle_delete_threshold == 0 {
            return Err("blocking.throttle_delete_threshold cannot be 0".to_string());
        }
        // 2^(n-1) minutes must stay representable; thresholds this large make
        // no operational sense anyway.
        if self.throttle_delete_threshold > 32 {
            return Err(format!(
                "blocking.throttle_delete_threshold {} is too large (max 32)",
                self.throttle_delete_threshold
            ));
        }
        Ok(())
    }
}

/// Statistics retention and hot-cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Days of per-credential daily statistics to keep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Minutes between janitor sweeps.
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,
    /// Whether the janitor runs at all.
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
    /// Hot cache refresh interval in seconds (floored at 60 internally).
    #[serde(default = "default_cache_expiry_seconds")]
    pub cache_expiry_seconds: u64,
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_minutes() -> u64 {
    60
}

fn default_auto_cleanup() -> bool {
    true
}

fn default_cache_expiry_seconds() -> u64 {
    60
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            auto_cleanup: default_auto_cleanup(),
            cache_expiry_seconds: default_cache_expiry_seconds(),
        }
    }
}

impl StatsConfig {
    /// Janitor sweep interval as a Duration. A zero interval would panic
    /// tokio's timer, so it falls back to one minute.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.max(1) * 60)
    }
}

/// A cacheable GET path on the provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheablePath {
    /// Regular expression matched against the request path.
    pub pattern: String,
    /// Seconds a cached 200 response stays fresh.
    #[serde(default = "default_cacheable_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cacheable_ttl_seconds() -> u64 {
    60
}

/// One upstream provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, referenced by `server.provider`.
    pub name: String,
    /// Full upstream base URL (scheme + host, optionally a path prefix).
    pub base_url: String,
    /// Header carrying the outbound credential (e.g., "Authorization").
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Upstream request deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Content rules applied to inbound requests.
    #[serde(default)]
    pub validation: Vec<ValidationRule>,
    /// Idempotent GET paths served from the response cache.
    #[serde(default)]
    pub cacheable_paths: Vec<CacheablePath>,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl ProviderConfig {
    /// Upstream deadline as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate provider configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err(format!("providers.{}.base_url cannot be empty", self.name));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!(
                "providers.{}.base_url must be an absolute http(s) URL, got {:?}",
                self.name, self.base_url
            ));
        }
        if self.timeout_ms == 0 {
            return Err(format!("providers.{}.timeout_ms cannot be 0", self.name));
        }
        for path in &self.cacheable_paths {
            regex::Regex::new(&path.pattern).map_err(|e| {
                format!(
                    "providers.{}.cacheable_paths pattern {:?} is invalid: {e}",
                    self.name, path.pattern
                )
            })?;
        }
        Ok(())
    }
}

/// TLS listener configuration. Recognized and validated; termination itself
/// is handled by the fronting listener.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl SslConfig {
    /// Validate TLS configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => {
                if !cert.exists() {
                    return Err(format!("ssl.cert_path {} does not exist", cert.display()));
                }
                if !key.exists() {
                    return Err(format!("ssl.key_path {} does not exist", key.display()));
                }
                Ok(())
            }
            _ => Err("ssl.enabled requires both cert_path and key_path".to_string()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blocking and backoff policy.
    #[serde(default)]
    pub blocking: BlockingConfig,
    /// Statistics retention and hot cache.
    #[serde(default)]
    pub stats: StatsConfig,
    /// Configured upstream providers.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// TLS listener settings.
    #[serde(default)]
    pub ssl: SslConfig,
    /// At-rest encryption key, 64 hex characters. The environment variable
    /// KEYPOOL_ENCRYPTION_KEY takes precedence; when both are absent a key
    /// is generated and persisted beside the database with mode 0600.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            blocking: BlockingConfig::default(),
            stats: StatsConfig::default(),
            providers: Vec::new(),
            ssl: SslConfig::default(),
            encryption_key: None,
        }
    }
}

impl AppConfig {
    /// The provider this instance fronts, if one resolves.
    ///
    /// `server.provider` selects by name; with no explicit selection a
    /// single configured provider is used implicitly.
    pub fn provider(&self) -> Option<&ProviderConfig> {
        match &self.server.provider {
            Some(name) => self.providers.iter().find(|p| &p.name == name),
            None if self.providers.len() == 1 => self.providers.first(),
            None => None,
        }
    }

    /// Validate the whole configuration. Returns non-fatal warnings;
    /// fatal problems come back as the error.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        self.blocking.validate()?;
        self.ssl.validate()?;
        for provider in &self.providers {
            provider.validate()?;
        }

        if let Some(name) = &self.server.provider {
            if !self.providers.iter().any(|p| &p.name == name) {
                return Err(format!(
                    "server.provider {name:?} does not name a configured provider"
                ));
            }
        }

        if self.provider().is_none() {
            warnings.push(
                "no provider resolved: all proxied requests will be answered with 404"
                    .to_string(),
            );
        }

        if self.stats.cache_expiry_seconds < 60 {
            warnings.push(format!(
                "stats.cache_expiry_seconds={} is below the 60s floor and will be clamped",
                self.stats.cache_expiry_seconds
            ));
        }

        if let Some(key) = &self.encryption_key {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("encryption_key must be exactly 64 hex characters".to_string());
            }
        }

        Ok(warnings)
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** In-process defaults, one stub provider.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                provider: Some("test".to_string()),
                ..Default::default()
            },
            providers: vec![ProviderConfig {
                name: "test".to_string(),
                base_url: "http://127.0.0.1:1".to_string(),
                auth_header: default_auth_header(),
                timeout_ms: default_timeout_ms(),
                validation: Vec::new(),
                cacheable_paths: Vec::new(),
            }],
            ..Default::default()
        }
    }
}
