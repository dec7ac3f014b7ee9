//! Consent resolution and anonymization.
//!
//! The engine never stores consent itself; it resolves records through the
//! [`ConsentGate`] trait backed by the external privacy-preference store.
//! Absence of a record means no consent. Anonymization is deterministic:
//! coordinates are coarsened, display names masked, and the persisted
//! tourist id replaced with a stable salted hash so analytics can still
//! group rows per (anonymous) tourist.

use crate::error::Result;
use crate::types::{ConsentDecision, TouristId};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;

/// Resolves per-tourist consent for one position update.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// engine can hold implementations as `Arc<dyn ConsentGate>`.
pub trait ConsentGate: Send + Sync {
    /// Check consent for `tourist`.
    ///
    /// # Errors
    ///
    /// `ConsentRequired` when consent is absent or withdrawn;
    /// `DependencyUnavailable` when the lookup backend is unreachable.
    fn allow<'a>(
        &'a self,
        tourist: &'a TouristId,
    ) -> Pin<Box<dyn Future<Output = Result<ConsentDecision>> + Send + 'a>>;
}

/// Deterministic anonymization applied before persistence.
#[derive(Clone, Debug)]
pub struct Anonymizer {
    salt: String,
}

impl Anonymizer {
    /// Create an anonymizer with the configured salt.
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Round a coordinate to two decimal places (~1.1 km of latitude).
    #[must_use]
    pub fn round_coordinate(value: f64) -> f64 {
        (value * 100.0).round() / 100.0
    }

    /// Reduce a display name to its first character followed by asterisks
    /// of the original length.
    #[must_use]
    pub fn mask_name(name: &str) -> String {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => {
                let len = name.chars().count();
                let mut masked = String::with_capacity(len + 1);
                masked.push(first);
                masked.extend(std::iter::repeat('*').take(len));
                masked
            }
            None => String::new(),
        }
    }

    /// Stable salted hash standing in for the cleartext tourist id in
    /// persisted records.
    #[must_use]
    pub fn hash_tourist_id(&self, tourist: &TouristId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(b":");
        hasher.update(tourist.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}
