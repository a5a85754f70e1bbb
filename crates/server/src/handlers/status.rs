//! Status page and health endpoint.

use crate::state::AppState;
use axum::extract::State;
use axum::response::Html;
use axum::Json;
use keypool_metadata::CredentialRepo;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub pool: PoolHealth,
    pub cache: CacheHealth,
}

#[derive(Debug, Serialize)]
pub struct PoolHealth {
    pub total_keys: u64,
    pub available_keys: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub cached: bool,
    pub age_seconds: Option<u64>,
    pub key_count: usize,
    pub stats_count: usize,
}

/// GET /health - Health check.
///
/// Intentionally unauthenticated for load balancers and monitoring.
/// `healthy` means the store answers and the hot cache has a snapshot;
/// `initializing` means no snapshot has been built yet; `degraded` means
/// the store is not answering.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = state.cache.status();

    let (status, total_keys) = match state.store.count().await {
        Ok(count) if cache.cached => ("healthy", count),
        Ok(count) => ("initializing", count),
        Err(e) => {
            tracing::error!(error = %e, "health check: store unavailable");
            ("degraded", 0)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        pool: PoolHealth {
            total_keys,
            available_keys: cache.key_count,
        },
        cache: CacheHealth {
            cached: cache.cached,
            age_seconds: cache.age_seconds,
            key_count: cache.key_count,
            stats_count: cache.stats_count,
        },
    })
}

/// GET / - Human-readable status page.
pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let total_keys = state.store.count().await.unwrap_or(0);
    let provider = state
        .provider
        .as_ref()
        .map(|p| p.name.as_str())
        .unwrap_or("(none)");

    // A snapshot read doubles as a cache warm-up for a freshly started
    // process. Only display forms reach the page, never material.
    let (available, cache_age, key_rows) = match state.cache.snapshot().await {
        Ok(snapshot) => {
            let mut rows = String::new();
            for credential in &snapshot.credentials {
                let (calls, throttles) = snapshot
                    .stats
                    .get(&credential.id)
                    .map(|s| (s.call_count, s.throttle_count))
                    .unwrap_or((0, 0));
                rows.push_str(&format!(
                    "    <tr><td>{}</td><td>{calls}</td><td>{throttles}</td></tr>\n",
                    credential.display
                ));
            }
            (
                snapshot.credentials.len(),
                format!("{}s", snapshot.age().as_secs()),
                rows,
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "status page: snapshot unavailable");
            (0, "-".to_string(), String::new())
        }
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>keypool</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 40rem; }}
    table {{ border-collapse: collapse; margin-bottom: 1.5rem; }}
    td, th {{ border: 1px solid #ccc; padding: 0.3rem 0.8rem; text-align: left; }}
  </style>
</head>
<body>
  <h1>keypool v{version}</h1>
  <table>
    <tr><th>Provider</th><td>{provider}</td></tr>
    <tr><th>Uptime</th><td>{uptime}s</td></tr>
    <tr><th>Pool size</th><td>{total_keys}</td></tr>
    <tr><th>Available</th><td>{available}</td></tr>
    <tr><th>Cache age</th><td>{cache_age}</td></tr>
  </table>
  <table>
    <tr><th>Key</th><th>Calls today</th><th>Throttles today</th></tr>
{key_rows}  </table>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        provider = provider,
        uptime = state.uptime_seconds(),
        total_keys = total_keys,
        available = available,
        cache_age = cache_age,
        key_rows = key_rows,
    ))
}
