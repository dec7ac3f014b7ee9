//! Authentication extractors.
//!
//! Handlers take [`Authenticated`] as a parameter to require a resolved
//! principal. Tokens arrive as `Authorization: Bearer <token>` headers, or
//! as a `token` query parameter for WebSocket handshakes where browsers
//! cannot set headers.

use super::error::AppError;
use super::state::AppState;
use crate::types::Principal;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Bearer token extracted from the request.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token" && !value.is_empty()).then(|| value.to_string())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
        {
            let token = header
                .strip_prefix("Bearer ")
                .ok_or_else(|| {
                    AppError::unauthorized("Invalid authorization format, expected 'Bearer <token>'")
                })?
                .to_string();
            if token.is_empty() {
                return Err(AppError::unauthorized("Empty bearer token"));
            }
            return Ok(Self(token));
        }

        if let Some(token) = parts.uri.query().and_then(token_from_query) {
            return Ok(Self(token));
        }

        Err(AppError::unauthorized("Missing bearer token"))
    }
}

/// A resolved, authenticated principal.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let principal = state.sessions.resolve(&token).await?;
        Ok(Self(principal))
    }
}
