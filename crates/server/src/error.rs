//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type, mapped onto the outbound status taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing credential: no Authorization header")]
    MissingCredential,

    #[error("rate limited: retry in {wait_secs} seconds")]
    PresenterRateLimited { wait_secs: u64 },

    #[error("{0}")]
    CredentialLengthInvalid(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("provider misconfigured: {0}")]
    ProviderMisconfigured(String),

    #[error("no provider configured")]
    NoProvider,

    #[error("no credential available in the pool")]
    PoolEmpty,

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream request timed out")]
    CacheableUpstreamTimeout,

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] keypool_metadata::StoreError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::PresenterRateLimited { .. } => "presenter_rate_limited",
            Self::CredentialLengthInvalid(_) => "credential_length_invalid",
            Self::ValidationFailed(_) => "validation_failed",
            Self::ProviderMisconfigured(_) | Self::NoProvider => "provider_misconfigured",
            Self::PoolEmpty => "pool_empty",
            Self::UpstreamTimeout | Self::CacheableUpstreamTimeout => "upstream_timeout",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::Internal(_) | Self::Store(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::PresenterRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CredentialLengthInvalid(_) | Self::ValidationFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ProviderMisconfigured(_) => StatusCode::BAD_REQUEST,
            Self::NoProvider => StatusCode::NOT_FOUND,
            Self::PoolEmpty => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::BAD_GATEWAY,
            Self::CacheableUpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        if let Self::PresenterRateLimited { wait_secs } = self {
            return (status, [("Retry-After", wait_secs.to_string())], Json(body))
                .into_response();
        }
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_documented_statuses() {
        assert_eq!(ApiError::MissingCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::PresenterRateLimited { wait_secs: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::CredentialLengthInvalid("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NoProvider.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::PoolEmpty.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::UpstreamTimeout.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::CacheableUpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
