//! Mock session resolver.

use crate::auth::AuthSessions;
use crate::error::{EngineError, Result};
use crate::types::{Principal, Role};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Fixed token → principal map.
#[derive(Clone, Default)]
pub struct StaticAuthSessions {
    sessions: Arc<Mutex<HashMap<String, Principal>>>,
}

impl StaticAuthSessions {
    /// Create an empty resolver: every token is invalid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tourist session.
    pub fn add_tourist(&self, token: &str, id: &str, name: &str) {
        self.add(token, id, name, Role::Tourist);
    }

    /// Register an authority session.
    pub fn add_authority(&self, token: &str, id: &str, name: &str) {
        self.add(token, id, name, Role::Authority);
    }

    fn add(&self, token: &str, id: &str, name: &str, role: Role) {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                token.to_string(),
                Principal {
                    id: id.to_string(),
                    name: name.to_string(),
                    role,
                },
            );
    }
}

impl AuthSessions for StaticAuthSessions {
    fn resolve<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Principal>> + Send + 'a>> {
        let principal = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(token)
            .cloned();
        Box::pin(async move { principal.ok_or(EngineError::Unauthenticated) })
    }
}
