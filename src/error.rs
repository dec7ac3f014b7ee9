//! Error taxonomy for the tracking engine.
//!
//! Every fallible engine operation returns [`EngineError`]. Each variant
//! carries a stable `kind` tag that survives serialization to clients, so
//! UIs can branch on it without parsing messages.
//!
//! Dependency failures (hot cache, history store) are deliberately *not*
//! part of the ingestion result: those degrade in place and are only logged.

use std::time::Duration;
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure modes of the location-ingestion and geofencing engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// No authenticated principal could be resolved from the request.
    #[error("Authentication required")]
    Unauthenticated,

    /// The principal is authenticated but not allowed to perform the action.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// A rate-limit bucket for the principal is exhausted.
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested delay before the next attempt.
        retry_after: Duration,
    },

    /// The request payload failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A polygon or circle failed geometric validation.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The tourist has not granted location-sharing consent.
    #[error("Location-sharing consent required")]
    ConsentRequired,

    /// The referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The operation conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A required external dependency is unreachable.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable tag for this error.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidGeometry(_) => "invalid_geometry",
            Self::ConsentRequired => "consent_required",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` when the error is caused by the caller's input rather
    /// than by engine or dependency state.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::InvalidGeometry(_)
                | Self::ConsentRequired
                | Self::Unauthenticated
                | Self::Unauthorized(_)
        )
    }
}
