use crate::admission::{Admission, AdmissionPolicy, AdmissionRequest};
use crate::store::CounterStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Bucket count above which idle buckets are swept on the next check.
const SWEEP_THRESHOLD: usize = 10_000;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter per client key.
///
/// Buckets live in process memory; the shared counter store is not used.
pub struct TokenBucketRateLimit {
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketRateLimit {
    /// Create a new rate limiter.
    /// - `max_tokens`: maximum burst size
    /// - `refill_rate`: tokens added per second
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Try to consume one token for `client_key`.
    /// Returns `true` if allowed, `false` if rate limited.
    pub async fn check(&self, client_key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        // A bucket idle long enough to refill completely is the same as a new one.
        if buckets.len() >= SWEEP_THRESHOLD {
            let idle = self.time_to_full();
            buckets.retain(|_, b| now.duration_since(b.last_refill) < idle);
        }

        let bucket = buckets
            .entry(client_key.to_string())
            .or_insert(Bucket {
                tokens: self.max_tokens,
                last_refill: now,
            });

        let elapsed = now.duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_to_full(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_tokens / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

#[async_trait]
impl AdmissionPolicy for TokenBucketRateLimit {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    async fn admit(&self, request: &AdmissionRequest, _store: &dyn CounterStore) -> Admission {
        if self.check(&request.client_key).await {
            Admission::Admit
        } else {
            warn!(client = %request.client_key, path = %request.path, "Rate limited request");
            Admission::too_many("Rate limit exceeded")
        }
    }
}
