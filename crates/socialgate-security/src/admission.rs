use crate::rate_limit::TokenBucketRateLimit;
use crate::store::CounterStore;
use async_trait::async_trait;
use socialgate_core::{ConcurrencyPolicyConfig, RateLimitPolicyConfig};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// What an admission policy sees of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub method: String,
    pub path: String,
    /// Identity used for per-client accounting (forwarded address, peer
    /// address or `anonymous`).
    pub client_key: String,
}

impl AdmissionRequest {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_key: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_key: client_key.into(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Stop the pipeline and answer with `status`.
    Reject { status: u16, reason: String },
}

impl Admission {
    /// Rejection with `429 Too Many Requests`.
    pub fn too_many(reason: impl Into<String>) -> Self {
        Self::Reject {
            status: 429,
            reason: reason.into(),
        }
    }
}

/// A pre-routing admission hook.
///
/// The gateway runs one policy for rate limiting and one for concurrency
/// limiting, in that order, before authentication. [`AdmissionPolicy::release`]
/// is called once the response has been produced, only for admitted requests.
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn admit(&self, request: &AdmissionRequest, store: &dyn CounterStore) -> Admission;

    async fn release(&self, _request: &AdmissionRequest, _store: &dyn CounterStore) {}
}

/// Admits every request. This is the default for both hooks: no limiting
/// is enforced unless a policy is configured.
pub struct PassThrough;

#[async_trait]
impl AdmissionPolicy for PassThrough {
    fn name(&self) -> &'static str {
        "pass_through"
    }

    async fn admit(&self, _request: &AdmissionRequest, _store: &dyn CounterStore) -> Admission {
        Admission::Admit
    }
}

/// At most `limit` requests per client in each fixed window.
///
/// Counts live in the shared store so every gateway replica sees the same
/// window. Store failures admit the request.
pub struct FixedWindowRateLimit {
    limit: u64,
    window: Duration,
}

impl FixedWindowRateLimit {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    fn window_key(&self, client_key: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let index = now / self.window.as_secs().max(1);
        format!("ratelimit:{client_key}:{index}")
    }
}

#[async_trait]
impl AdmissionPolicy for FixedWindowRateLimit {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    async fn admit(&self, request: &AdmissionRequest, store: &dyn CounterStore) -> Admission {
        let key = self.window_key(&request.client_key);
        match store.incr(&key, Some(self.window)).await {
            Ok(count) if count > self.limit => {
                warn!(
                    client = %request.client_key,
                    path = %request.path,
                    count,
                    limit = self.limit,
                    "Rate limited request"
                );
                Admission::too_many("Rate limit exceeded")
            }
            Ok(_) => Admission::Admit,
            Err(e) => {
                warn!(error = %e, "Counter store unavailable, admitting request");
                Admission::Admit
            }
        }
    }
}

/// Lifetime of an in-flight counter, so slots lost by a crashed replica
/// eventually come back.
const IN_FLIGHT_TTL: Duration = Duration::from_secs(300);

/// At most `max_in_flight` concurrent requests per client.
pub struct ConcurrencyLimit {
    max_in_flight: u64,
    backstop: Duration,
}

impl ConcurrencyLimit {
    pub fn new(max_in_flight: u64) -> Self {
        Self {
            max_in_flight,
            backstop: IN_FLIGHT_TTL,
        }
    }

    fn key(client_key: &str) -> String {
        format!("inflight:{client_key}")
    }
}

#[async_trait]
impl AdmissionPolicy for ConcurrencyLimit {
    fn name(&self) -> &'static str {
        "max_in_flight"
    }

    async fn admit(&self, request: &AdmissionRequest, store: &dyn CounterStore) -> Admission {
        let key = Self::key(&request.client_key);
        match store.incr(&key, Some(self.backstop)).await {
            Ok(in_flight) if in_flight > self.max_in_flight => {
                // Undo our own increment; a rejected request is never released.
                if let Err(e) = store.decr(&key).await {
                    warn!(error = %e, "Failed to roll back in-flight counter");
                }
                warn!(
                    client = %request.client_key,
                    path = %request.path,
                    max_in_flight = self.max_in_flight,
                    "Concurrency limited request"
                );
                Admission::too_many("Too many concurrent requests")
            }
            Ok(_) => Admission::Admit,
            Err(e) => {
                warn!(error = %e, "Counter store unavailable, admitting request");
                Admission::Admit
            }
        }
    }

    async fn release(&self, request: &AdmissionRequest, store: &dyn CounterStore) {
        if let Err(e) = store.decr(&Self::key(&request.client_key)).await {
            warn!(error = %e, "Failed to release in-flight counter");
        }
    }
}

/// Build the rate-limit hook policy described by `config`.
pub fn rate_limit_policy(config: &RateLimitPolicyConfig) -> Arc<dyn AdmissionPolicy> {
    match config {
        RateLimitPolicyConfig::None => Arc::new(PassThrough),
        RateLimitPolicyConfig::FixedWindow { limit, window_secs } => Arc::new(
            FixedWindowRateLimit::new(*limit, Duration::from_secs(*window_secs)),
        ),
        RateLimitPolicyConfig::TokenBucket {
            burst,
            refill_per_sec,
        } => Arc::new(TokenBucketRateLimit::new(*burst, *refill_per_sec)),
    }
}

/// Build the concurrency hook policy described by `config`.
pub fn concurrency_policy(config: &ConcurrencyPolicyConfig) -> Arc<dyn AdmissionPolicy> {
    match config {
        ConcurrencyPolicyConfig::None => Arc::new(PassThrough),
        ConcurrencyPolicyConfig::MaxInFlight { max_in_flight } => {
            Arc::new(ConcurrencyLimit::new(*max_in_flight))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryCounterStore;
    use socialgate_core::{GatewayError, GatewayResult};

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr(&self, _key: &str, _ttl: Option<Duration>) -> GatewayResult<u64> {
            Err(GatewayError::Store("connection refused".into()))
        }
        async fn decr(&self, _key: &str) -> GatewayResult<u64> {
            Err(GatewayError::Store("connection refused".into()))
        }
    }

    fn req(client: &str) -> AdmissionRequest {
        AdmissionRequest::new("GET", "/post/feed", client)
    }

    #[tokio::test]
    async fn test_pass_through_always_admits() {
        let store = MemoryCounterStore::new();
        for _ in 0..100 {
            assert_eq!(PassThrough.admit(&req("c"), &store).await, Admission::Admit);
        }
    }

    #[tokio::test]
    async fn test_fixed_window_rejects_over_limit() {
        let policy = FixedWindowRateLimit::new(2, Duration::from_secs(3600));
        let store = MemoryCounterStore::new();
        assert_eq!(policy.admit(&req("c"), &store).await, Admission::Admit);
        assert_eq!(policy.admit(&req("c"), &store).await, Admission::Admit);
        assert_eq!(
            policy.admit(&req("c"), &store).await,
            Admission::too_many("Rate limit exceeded")
        );
        assert_eq!(policy.admit(&req("d"), &store).await, Admission::Admit);
    }

    #[tokio::test]
    async fn test_concurrency_limit_counts_in_flight() {
        let policy = ConcurrencyLimit::new(1);
        let store = MemoryCounterStore::new();
        let r = req("c");

        assert_eq!(policy.admit(&r, &store).await, Admission::Admit);
        assert_eq!(
            policy.admit(&r, &store).await,
            Admission::too_many("Too many concurrent requests")
        );
        policy.release(&r, &store).await;
        assert_eq!(policy.admit(&r, &store).await, Admission::Admit);
    }

    #[tokio::test]
    async fn test_leaked_in_flight_slot_expires() {
        let policy = ConcurrencyLimit {
            max_in_flight: 1,
            backstop: Duration::from_millis(30),
        };
        let store = MemoryCounterStore::new();
        let r = req("c");

        // Admitted but never released.
        assert_eq!(policy.admit(&r, &store).await, Admission::Admit);
        assert_ne!(policy.admit(&r, &store).await, Admission::Admit);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(policy.admit(&r, &store).await, Admission::Admit);
    }

    #[tokio::test]
    async fn test_store_failure_admits() {
        let r = req("c");
        let fixed = FixedWindowRateLimit::new(1, Duration::from_secs(60));
        let conc = ConcurrencyLimit::new(1);
        for _ in 0..3 {
            assert_eq!(fixed.admit(&r, &BrokenStore).await, Admission::Admit);
            assert_eq!(conc.admit(&r, &BrokenStore).await, Admission::Admit);
        }
    }

    #[test]
    fn test_factories_follow_config() {
        assert_eq!(
            rate_limit_policy(&RateLimitPolicyConfig::None).name(),
            "pass_through"
        );
        assert_eq!(
            rate_limit_policy(&RateLimitPolicyConfig::FixedWindow {
                limit: 1,
                window_secs: 1
            })
            .name(),
            "fixed_window"
        );
        assert_eq!(
            rate_limit_policy(&RateLimitPolicyConfig::TokenBucket {
                burst: 10.0,
                refill_per_sec: 1.0
            })
            .name(),
            "token_bucket"
        );
        assert_eq!(
            concurrency_policy(&ConcurrencyPolicyConfig::None).name(),
            "pass_through"
        );
        assert_eq!(
            concurrency_policy(&ConcurrencyPolicyConfig::MaxInFlight { max_in_flight: 4 }).name(),
            "max_in_flight"
        );
    }
}
