//! The admission pipeline: the handler behind every proxied request.

use crate::error::{ApiError, ApiResult};
use crate::forwarder::{AuthMode, ForwardError, Forwarder, UpstreamResponse};
use crate::lifecycle::{self, SelectedKey};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use keypool_core::config::ProviderConfig;
use keypool_metadata::{CredentialRepo, StatsRepo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Handle a proxied request: admission, selection, forwarding, lifecycle
/// feedback, relay.
pub async fn proxy(State(state): State<AppState>, req: Request) -> Response {
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match run_pipeline(&state, req).await {
        Ok(response) => response,
        Err(error) => {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %error,
                "request rejected"
            );
            error.into_response()
        }
    }
}

async fn run_pipeline(state: &AppState, req: Request) -> ApiResult<Response> {
    // 1. A provider must be configured.
    let provider = state.provider.clone().ok_or(ApiError::NoProvider)?;

    // 2. A trusted proxy-host header, when present, must name the
    // provider's host.
    check_proxy_host(&provider, req.headers())?;

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    // 3. Configured read-only GETs bypass auth rewriting and the pool.
    if method == Method::GET {
        if let Some(ttl) = state.cacheable_ttl(&path) {
            return cacheable_read(state, &provider, req, &path_and_query, ttl).await;
        }
    }

    // 4. Extract the presented credential.
    let material = extract_credential(req.headers()).ok_or(ApiError::MissingCredential)?;
    let fingerprint = keypool_core::fingerprint(&material);

    // 5. Presenter rate limit.
    state
        .lifecycle
        .check_presenter_rate_limit(&fingerprint)
        .map_err(|wait_secs| ApiError::PresenterRateLimited { wait_secs })?;

    // 6. Length gate, then provider content rules.
    keypool_core::validation::validate_length(&material)
        .map_err(|e| ApiError::CredentialLengthInvalid(e.to_string()))?;

    // 7. Client attribution (leftmost X-Forwarded-For, X-Real-IP, socket).
    let client_subnet = lifecycle::subnet(&client_ip(&req));

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::ValidationFailed(format!("unreadable request body: {e}")))?;

    let body_json = serde_json::from_slice::<serde_json::Value>(&body).ok();
    keypool_core::validation::validate_request(
        &provider.validation,
        body_json.as_ref(),
        &path,
        &query,
    )
    .map_err(|e| ApiError::ValidationFailed(e.to_string()))?;

    // 8. Pool decision: unknown presenters go out transient; a blocked
    // presenter is isolated onto their own credential; everyone else is
    // load-balanced over the snapshot.
    let now = OffsetDateTime::now_utc();
    let selected = match state.store.find_by_fingerprint(&fingerprint).await? {
        None => SelectedKey::transient(material),
        Some(row) if row.is_blocked(now) => {
            tracing::debug!(credential = %row.display, "presenter blocked, isolation mode");
            SelectedKey::Resident(row)
        }
        Some(_) => {
            let snapshot = state.cache.snapshot().await?;
            let chosen = state
                .balancer
                .select(&snapshot.credentials, &snapshot.stats, &fingerprint)
                .ok_or(ApiError::PoolEmpty)?
                .clone();
            SelectedKey::Resident(chosen)
        }
    };

    // 9. Attribute the call before it leaves.
    if let SelectedKey::Resident(row) = &selected {
        state
            .store
            .increment_call_count(row.id, &client_subnet)
            .await?;
    }

    // 10. Forward with the selected credential.
    let upstream = state
        .forwarder
        .forward(
            &provider,
            method,
            &path_and_query,
            &parts.headers,
            body,
            AuthMode::Rewrite(selected.material()),
        )
        .await
        .map_err(|e| match e {
            ForwardError::Timeout => ApiError::UpstreamTimeout,
            ForwardError::Unreachable(msg) => ApiError::UpstreamUnreachable(msg),
            ForwardError::Invalid(msg) => ApiError::Internal(msg),
        })?;

    // 11. Feed the status back into credential state. The client gets the
    // upstream response either way; bookkeeping failures only log.
    match state
        .lifecycle
        .handle_response(&selected, upstream.status.as_u16())
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                credential = %selected.display(),
                upstream_status = upstream.status.as_u16(),
                action = ?outcome.action,
                "{}",
                outcome.message
            );
        }
        Err(e) => {
            tracing::error!(
                credential = %selected.display(),
                error = %e,
                "lifecycle bookkeeping failed"
            );
        }
    }

    // 12. Relay verbatim.
    Ok(relay(upstream))
}

/// The §4.9 read-only path: serve from cache, else forward with the
/// caller's own headers and cache a 200.
async fn cacheable_read(
    state: &AppState,
    provider: &Arc<ProviderConfig>,
    req: Request,
    path_and_query: &str,
    ttl: Duration,
) -> ApiResult<Response> {
    let url = Forwarder::upstream_url(provider, path_and_query)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .to_string();
    let method = req.method().clone();

    if let Some(hit) = state.response_cache.get(&method, &url) {
        tracing::debug!(url = %url, "response cache hit");
        return Ok(relay(UpstreamResponse {
            status: hit.status,
            headers: hit.headers,
            body: hit.body,
        }));
    }

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::ValidationFailed(format!("unreadable request body: {e}")))?;

    let upstream = state
        .forwarder
        .forward(
            provider,
            method.clone(),
            path_and_query,
            &parts.headers,
            body,
            AuthMode::Passthrough,
        )
        .await
        .map_err(|e| match e {
            ForwardError::Timeout => ApiError::CacheableUpstreamTimeout,
            ForwardError::Unreachable(msg) => ApiError::UpstreamUnreachable(msg),
            ForwardError::Invalid(msg) => ApiError::Internal(msg),
        })?;

    if upstream.status == StatusCode::OK {
        state.response_cache.put(
            method,
            url,
            upstream.status,
            upstream.headers.clone(),
            upstream.body.clone(),
            ttl,
        );
    }

    Ok(relay(upstream))
}

/// Presented credential from the Authorization header: "Bearer X" or the
/// raw value. Per RFC 6750 the scheme is case-insensitive.
fn extract_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        let material = value[7..].trim();
        (!material.is_empty()).then(|| material.to_string())
    } else {
        Some(value.to_string())
    }
}

/// Proxy-host check: when the client names the upstream it expects, it must
/// match the configured provider's host.
fn check_proxy_host(provider: &ProviderConfig, headers: &HeaderMap) -> ApiResult<()> {
    let Some(value) = headers.get("x-proxy-host") else {
        return Ok(());
    };
    let claimed = value
        .to_str()
        .map_err(|_| ApiError::ProviderMisconfigured("unreadable X-Proxy-Host".to_string()))?
        .trim();

    let host = reqwest::Url::parse(&provider.base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    if claimed.eq_ignore_ascii_case(&host) {
        Ok(())
    } else {
        Err(ApiError::ProviderMisconfigured(format!(
            "X-Proxy-Host {claimed:?} does not resolve to the configured provider"
        )))
    }
}

/// Client IP: leftmost X-Forwarded-For, then X-Real-IP, then the socket.
fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(s) = forwarded.to_str() {
            if let Some(ip) = s.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(s) = real_ip.to_str() {
            return s.trim().to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the client-facing response from an upstream one.
fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn credential_extraction_handles_bearer_and_raw() {
        assert_eq!(
            extract_credential(&headers_with_auth("Bearer sk-abc")).as_deref(),
            Some("sk-abc")
        );
        assert_eq!(
            extract_credential(&headers_with_auth("bearer sk-abc")).as_deref(),
            Some("sk-abc")
        );
        assert_eq!(
            extract_credential(&headers_with_auth("sk-raw-credential")).as_deref(),
            Some("sk-raw-credential")
        );
        assert!(extract_credential(&HeaderMap::new()).is_none());
        assert!(extract_credential(&headers_with_auth("Bearer ")).is_none());
    }

    #[test]
    fn proxy_host_check_compares_provider_host() {
        let provider = ProviderConfig {
            name: "test".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            auth_header: "Authorization".to_string(),
            timeout_ms: 1000,
            validation: Vec::new(),
            cacheable_paths: Vec::new(),
        };

        assert!(check_proxy_host(&provider, &HeaderMap::new()).is_ok());

        let mut matching = HeaderMap::new();
        matching.insert("x-proxy-host", "API.EXAMPLE.COM".parse().unwrap());
        assert!(check_proxy_host(&provider, &matching).is_ok());

        let mut wrong = HeaderMap::new();
        wrong.insert("x-proxy-host", "other.example.com".parse().unwrap());
        assert!(check_proxy_host(&provider, &wrong).is_err());
    }

    #[test]
    fn client_ip_prefers_leftmost_forwarded_for() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.9");

        let req = axum::http::Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "198.51.100.2");

        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), "unknown");
    }
}
