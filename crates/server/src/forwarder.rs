//! Outbound HTTP call to the upstream provider.
//!
//! The forwarder does no policy: given a provider, a credential (or the
//! caller's own headers on the passthrough path), and the inbound request,
//! it performs the upstream call with header sanitization and a deadline,
//! and hands back status, headers, and body.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use keypool_core::config::ProviderConfig;
use reqwest::Url;
use thiserror::Error;

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound auth-bearing headers, stripped before the pool credential is set.
const AUTH_HEADERS: [&str; 5] = [
    "authorization",
    "x-api-key",
    "api-key",
    "apikey",
    "proxy-authorization",
];

/// How the outbound credential is handled.
#[derive(Clone, Copy, Debug)]
pub enum AuthMode<'a> {
    /// Strip inbound auth headers and set `provider.auth_header` to the
    /// selected credential.
    Rewrite(&'a str),
    /// Forward the caller's own headers untouched (cacheable read path).
    Passthrough,
}

/// Forwarding errors, mapped to the error taxonomy by the pipeline.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    #[error("invalid upstream request: {0}")]
    Invalid(String),
}

/// An upstream response ready to relay.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Performs upstream calls.
pub struct Forwarder {
    client: reqwest::Client,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose the full upstream URL for an inbound path + query.
    pub fn upstream_url(
        provider: &ProviderConfig,
        path_and_query: &str,
    ) -> Result<Url, ForwardError> {
        let base = Url::parse(&provider.base_url)
            .map_err(|e| ForwardError::Invalid(format!("base_url: {e}")))?;
        base.join(path_and_query)
            .map_err(|e| ForwardError::Invalid(format!("path {path_and_query:?}: {e}")))
    }

    /// Perform the upstream call.
    pub async fn forward(
        &self,
        provider: &ProviderConfig,
        method: Method,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
        auth: AuthMode<'_>,
    ) -> Result<UpstreamResponse, ForwardError> {
        let url = Self::upstream_url(provider, path_and_query)?;
        let headers = outbound_headers(provider, inbound_headers, auth)?;
        let body = reserialize_json(body)?;

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .timeout(provider.timeout())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let headers = relay_headers(response.headers());
        let body = response.bytes().await.map_err(classify)?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> ForwardError {
    if e.is_timeout() {
        ForwardError::Timeout
    } else {
        ForwardError::Unreachable(e.to_string())
    }
}

/// Whether a header must not cross the proxy in either direction.
fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_auth_header(name: &str) -> bool {
    AUTH_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copy inbound headers for the upstream request: hop-by-hop, Host, and
/// Content-Encoding always go; auth-bearing headers go when rewriting, and
/// the provider's auth header is set to the selected credential.
fn outbound_headers(
    provider: &ProviderConfig,
    inbound: &HeaderMap,
    auth: AuthMode<'_>,
) -> Result<HeaderMap, ForwardError> {
    let mut headers = HeaderMap::new();
    let rewriting = matches!(auth, AuthMode::Rewrite(_));

    for (name, value) in inbound {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str)
            || name_str.eq_ignore_ascii_case("host")
            || name_str.eq_ignore_ascii_case("content-length")
            || name_str.eq_ignore_ascii_case("content-encoding")
        {
            continue;
        }
        if rewriting
            && (is_auth_header(name_str)
                || name_str.eq_ignore_ascii_case(&provider.auth_header))
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let AuthMode::Rewrite(material) = auth {
        let name = HeaderName::from_bytes(provider.auth_header.as_bytes())
            .map_err(|e| ForwardError::Invalid(format!("auth_header name: {e}")))?;
        let value = HeaderValue::from_str(&format!("Bearer {material}"))
            .map_err(|e| ForwardError::Invalid(format!("credential not header-safe: {e}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Echo upstream response headers minus hop-by-hop and the encoding and
/// length of a body reqwest has already decoded. CORS and caching headers
/// pass through untouched.
fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str)
            || name_str.eq_ignore_ascii_case("content-encoding")
            || name_str.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Normalize a JSON body by re-serializing it; non-JSON bodies pass through
/// as raw bytes.
fn reserialize_json(body: Bytes) -> Result<Bytes, ForwardError> {
    if body.is_empty() {
        return Ok(body);
    }
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|e| ForwardError::Invalid(format!("body: {e}"))),
        Err(_) => Ok(body),
    }
}
