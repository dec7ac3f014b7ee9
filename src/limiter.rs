//! Per-principal, per-endpoint-class rate limiting.
//!
//! Independent sliding-window buckets keyed by (principal, endpoint class).
//! Time comes from the injected [`Clock`], so buckets are insensitive to
//! wall-clock jitter and never refill faster than their configured rate.

use crate::clock::Clock;
use crate::config::{LimitRule, RateLimitConfig};
use crate::error::{EngineError, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Logical endpoint classes with independent buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Everything without a dedicated bucket.
    General,
    /// Session handshake attempts.
    Auth,
    /// Position ingestion.
    Position,
    /// SOS injection.
    Sos,
    /// Zone management.
    GeofencingAdmin,
}

impl EndpointClass {
    /// Stable bucket-key prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Position => "position",
            Self::Sos => "sos",
            Self::GeofencingAdmin => "geofencing-admin",
        }
    }
}

/// Rate limiter over (principal, endpoint class) buckets.
pub trait RateLimiter: Send + Sync {
    /// Check the bucket and record this attempt atomically.
    ///
    /// # Errors
    ///
    /// `RateLimited` with a suggested retry delay when the bucket is full.
    fn check_and_record(
        &self,
        principal: &str,
        class: EndpointClass,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Current attempt count inside the window, for monitoring.
    fn attempts(
        &self,
        principal: &str,
        class: EndpointClass,
    ) -> impl std::future::Future<Output = Result<u32>> + Send;

    /// Drop all recorded attempts for a bucket.
    fn reset(
        &self,
        principal: &str,
        class: EndpointClass,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

const STRIPES: usize = 16;

/// In-process sliding-window limiter with striped locks.
///
/// Each stripe holds a map of bucket key to the attempt timestamps (ms)
/// still inside the window; old entries are pruned on access.
pub struct SlidingWindowLimiter {
    clock: Arc<dyn Clock>,
    rules: RateLimitConfig,
    stripes: Vec<Mutex<HashMap<String, Vec<i64>>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given rules.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, rules: RateLimitConfig) -> Self {
        Self {
            clock,
            rules,
            stripes: (0..STRIPES).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// The rule configured for an endpoint class.
    #[must_use]
    pub const fn rule(&self, class: EndpointClass) -> LimitRule {
        match class {
            EndpointClass::General => self.rules.general,
            EndpointClass::Auth => self.rules.auth,
            EndpointClass::Position => self.rules.position,
            EndpointClass::Sos => self.rules.sos,
            EndpointClass::GeofencingAdmin => self.rules.geofencing_admin,
        }
    }

    fn bucket_key(principal: &str, class: EndpointClass) -> String {
        format!("{}:{principal}", class.as_str())
    }

    fn stripe_for(&self, key: &str) -> &Mutex<HashMap<String, Vec<i64>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    async fn check_and_record(&self, principal: &str, class: EndpointClass) -> Result<()> {
        let rule = self.rule(class);
        let key = Self::bucket_key(principal, class);
        let now_ms = self.now_ms();
        #[allow(clippy::cast_possible_wrap)]
        let window_ms = (rule.window_secs * 1000) as i64;
        let window_start = now_ms - window_ms;

        let mut stripe = self
            .stripe_for(&key)
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let timestamps = stripe.entry(key.clone()).or_default();
        timestamps.retain(|&ts| ts > window_start);

        if timestamps.len() >= rule.max_requests as usize {
            // The bucket frees up when its oldest attempt ages out.
            let oldest = timestamps.first().copied().unwrap_or(now_ms);
            let retry_ms = (oldest + window_ms - now_ms).max(0);
            #[allow(clippy::cast_sign_loss)]
            let retry_after = Duration::from_millis(retry_ms as u64);

            tracing::warn!(
                rate_limit_exceeded = true,
                bucket = %key,
                attempts = timestamps.len(),
                max_requests = rule.max_requests,
                window_secs = rule.window_secs,
                "Rate limit exceeded"
            );
            return Err(EngineError::RateLimited { retry_after });
        }

        timestamps.push(now_ms);
        tracing::debug!(
            bucket = %key,
            attempts = timestamps.len(),
            max_requests = rule.max_requests,
            "Rate limit check passed"
        );
        Ok(())
    }

    async fn attempts(&self, principal: &str, class: EndpointClass) -> Result<u32> {
        let rule = self.rule(class);
        let key = Self::bucket_key(principal, class);
        let now_ms = self.now_ms();
        #[allow(clippy::cast_possible_wrap)]
        let window_start = now_ms - (rule.window_secs * 1000) as i64;

        let stripe = self
            .stripe_for(&key)
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        #[allow(clippy::cast_possible_truncation)]
        let count = stripe
            .get(&key)
            .map_or(0, |ts| ts.iter().filter(|&&t| t > window_start).count() as u32);
        Ok(count)
    }

    async fn reset(&self, principal: &str, class: EndpointClass) -> Result<()> {
        let key = Self::bucket_key(principal, class);
        let mut stripe = self
            .stripe_for(&key)
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        stripe.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn limiter() -> (Arc<ManualClock>, SlidingWindowLimiter) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let limiter = SlidingWindowLimiter::new(clock.clone(), RateLimitConfig::default());
        (clock, limiter)
    }

    #[tokio::test]
    async fn position_bucket_allows_twenty_then_blocks() {
        let (_clock, limiter) = limiter();

        for i in 1..=20 {
            let result = limiter.check_and_record("t3", EndpointClass::Position).await;
            assert!(result.is_ok(), "attempt {i} should pass");
        }

        let result = limiter.check_and_record("t3", EndpointClass::Position).await;
        assert!(matches!(result, Err(EngineError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn window_slides_with_clock() {
        let (clock, limiter) = limiter();

        for _ in 0..20 {
            limiter
                .check_and_record("t1", EndpointClass::Position)
                .await
                .unwrap();
        }
        assert!(limiter
            .check_and_record("t1", EndpointClass::Position)
            .await
            .is_err());

        // Advancing past the 60 s window frees the bucket.
        clock.advance(ChronoDuration::seconds(61));
        assert!(limiter
            .check_and_record("t1", EndpointClass::Position)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn buckets_are_independent_per_principal_and_class() {
        let (_clock, limiter) = limiter();

        for _ in 0..20 {
            limiter
                .check_and_record("t1", EndpointClass::Position)
                .await
                .unwrap();
        }
        // Same principal, different class: unaffected.
        assert!(limiter
            .check_and_record("t1", EndpointClass::Sos)
            .await
            .is_ok());
        // Different principal, same class: unaffected.
        assert!(limiter
            .check_and_record("t2", EndpointClass::Position)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn retry_after_reflects_oldest_entry() {
        let (clock, limiter) = limiter();

        for _ in 0..20 {
            limiter
                .check_and_record("t1", EndpointClass::Position)
                .await
                .unwrap();
        }
        clock.advance(ChronoDuration::seconds(30));

        let Err(EngineError::RateLimited { retry_after }) =
            limiter.check_and_record("t1", EndpointClass::Position).await
        else {
            panic!("expected rate limit");
        };
        // Oldest entry is 30 s old inside a 60 s window.
        assert!(retry_after <= Duration::from_secs(30));
        assert!(retry_after >= Duration::from_secs(29));
    }

    #[tokio::test]
    async fn attempts_and_reset() {
        let (_clock, limiter) = limiter();

        for _ in 0..3 {
            limiter
                .check_and_record("t1", EndpointClass::General)
                .await
                .unwrap();
        }
        assert_eq!(
            limiter.attempts("t1", EndpointClass::General).await.unwrap(),
            3
        );

        limiter.reset("t1", EndpointClass::General).await.unwrap();
        assert_eq!(
            limiter.attempts("t1", EndpointClass::General).await.unwrap(),
            0
        );
    }
}
