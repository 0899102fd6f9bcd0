//! Optional bearer-token check.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;

use super::AppState;
use super::error::ApiError;

/// Extractor that passes when no token is configured or the request
/// carries `Authorization: Bearer <token>` with the configured value.
#[derive(Debug, Clone, Copy)]
pub struct Caller;

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Ok(Caller);
        };

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("expected Authorization: Bearer <token>".into())
        })?;

        if token != expected.expose_secret() {
            return Err(ApiError::Unauthorized("invalid token".into()));
        }
        Ok(Caller)
    }
}
