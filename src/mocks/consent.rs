//! Mock consent gate.

use crate::consent::ConsentGate;
use crate::error::{EngineError, Result};
use crate::types::{ConsentDecision, ConsentRecord, TouristId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory consent records with optional artificial latency.
///
/// Absence of a record resolves to `ConsentRequired`, matching the
/// production gate.
#[derive(Clone, Default)]
pub struct MockConsentGate {
    records: Arc<Mutex<HashMap<TouristId, ConsentRecord>>>,
    delay: Option<Duration>,
}

impl MockConsentGate {
    /// Create an empty gate: every tourist is consent-denied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every lookup only after `delay`, to exercise deadlines.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Grant consent for `tourist`.
    pub fn grant(&self, tourist: &TouristId, anonymize: bool, retention_days: u16) {
        let record = ConsentRecord {
            location_sharing: true,
            retention_days,
            anonymize,
            consent_given: true,
            consent_at: None,
        };
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(tourist.clone(), record);
    }

    /// Remove any consent record for `tourist`.
    pub fn revoke(&self, tourist: &TouristId) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(tourist);
    }
}

impl ConsentGate for MockConsentGate {
    fn allow<'a>(
        &'a self,
        tourist: &'a TouristId,
    ) -> Pin<Box<dyn Future<Output = Result<ConsentDecision>> + Send + 'a>> {
        let record = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(tourist)
            .cloned();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match record {
                Some(r) if r.consent_given && r.location_sharing => Ok(ConsentDecision {
                    anonymize: r.anonymize,
                    retention_days: r.retention_days,
                }),
                _ => Err(EngineError::ConsentRequired),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absence_means_no_consent() {
        let gate = MockConsentGate::new();
        let id = TouristId::new("t2");
        assert!(matches!(
            gate.allow(&id).await,
            Err(EngineError::ConsentRequired)
        ));
    }

    #[tokio::test]
    async fn granted_consent_carries_flags() {
        let gate = MockConsentGate::new();
        let id = TouristId::new("t1");
        gate.grant(&id, true, 30);

        let decision = gate.allow(&id).await.unwrap();
        assert!(decision.anonymize);
        assert_eq!(decision.retention_days, 30);

        gate.revoke(&id);
        assert!(gate.allow(&id).await.is_err());
    }
}
