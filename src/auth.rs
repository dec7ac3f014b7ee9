//! Session resolution: opaque bearer tokens to principals.
//!
//! Token issuance belongs to the external identity system; the engine only
//! resolves tokens it is handed. The production resolver reads the session
//! records that system maintains in Redis (`session:<token>`); tests use
//! the in-memory resolver from [`crate::mocks`].

use crate::error::{EngineError, Result};
use crate::types::{Principal, Role};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Resolves bearer tokens to authenticated principals.
pub trait AuthSessions: Send + Sync {
    /// Resolve `token` into a principal.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for unknown or expired tokens;
    /// `DependencyUnavailable` when the session backend is unreachable.
    fn resolve<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Principal>> + Send + 'a>>;
}

/// Session record shape written by the external identity system.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    user_id: String,
    name: String,
    role: Role,
}

/// Redis-backed session resolver.
#[derive(Clone)]
pub struct RedisAuthSessions {
    conn_manager: ConnectionManager,
}

impl RedisAuthSessions {
    /// Connect to the session store.
    ///
    /// # Errors
    ///
    /// `DependencyUnavailable` when the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            EngineError::DependencyUnavailable(format!("Failed to create Redis client: {e}"))
        })?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            EngineError::DependencyUnavailable(format!(
                "Failed to create Redis connection manager: {e}"
            ))
        })?;
        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn session_key(token: &str) -> String {
        format!("session:{token}")
    }
}

impl AuthSessions for RedisAuthSessions {
    fn resolve<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Principal>> + Send + 'a>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let payload: Option<String> =
                conn.get(Self::session_key(token)).await.map_err(|e| {
                    EngineError::DependencyUnavailable(format!("Session lookup failed: {e}"))
                })?;

            let Some(json) = payload else {
                return Err(EngineError::Unauthenticated);
            };

            let record: SessionRecord = serde_json::from_str(&json).map_err(|e| {
                tracing::error!(error = %e, "Malformed session record");
                EngineError::Unauthenticated
            })?;

            Ok(Principal {
                id: record.user_id,
                name: record.name,
                role: record.role,
            })
        })
    }
}
