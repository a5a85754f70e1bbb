//! Server test utilities.

use keypool_core::config::AppConfig;
use keypool_metadata::{KeyStore, SqliteStore};
use keypool_server::{create_router, AppState};
use keypool_vault::{EncryptionKey, Vault};
use std::sync::Arc;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server fronting the given upstream base URL.
    pub async fn new(upstream_base_url: &str) -> Self {
        Self::with_config(Self::test_config(upstream_base_url)).await
    }

    /// Test-friendly defaults: one provider pointed at `upstream_base_url`
    /// and the presenter gate disabled so sequential requests from one
    /// presenter pass.
    pub fn test_config(upstream_base_url: &str) -> AppConfig {
        let mut config = AppConfig::for_testing();
        config.providers[0].base_url = upstream_base_url.to_string();
        config.providers[0].timeout_ms = 5_000;
        config.blocking.presented_key_rate_limit_seconds = 0;
        config
    }

    /// Create a test server from an explicit configuration.
    pub async fn with_config(config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let vault = Vault::new(&EncryptionKey::generate());
        let db_path = temp_dir.path().join("keypool.db");
        let store: Arc<dyn KeyStore> = Arc::new(
            SqliteStore::new(&db_path, vault)
                .await
                .expect("Failed to create key store"),
        );

        let state = AppState::new(config, store);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// The shared key store.
    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.state.store
    }
}
