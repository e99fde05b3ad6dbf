//! Security primitives for the socialgate API gateway.
//!
//! Provides bearer-token verification and issuance, the admission-hook
//! strategy used before routing, and the shared counter store those hooks
//! consult.
//!
//! # Main types
//!
//! - [`TokenAuthority`]: Verifies and mints HMAC-signed JWTs.
//! - [`Claims`]: Claims carried by a verified token.
//! - [`AdmissionPolicy`]: Pluggable admit/reject decision for a request.
//! - [`PassThrough`]: Policy that admits everything (the default).
//! - [`FixedWindowRateLimit`] / [`TokenBucketRateLimit`]: Rate-limit policies.
//! - [`ConcurrencyLimit`]: In-flight request cap per client.
//! - [`CounterStore`]: Shared key counter service ([`MemoryCounterStore`],
//!   [`RedisCounterStore`]).

/// Admission hooks and the shipped policies.
pub mod admission;
/// Token-bucket rate limiting.
pub mod rate_limit;
/// Shared counter stores.
pub mod store;
/// Bearer token verification and issuance.
pub mod token;

pub use admission::{
    concurrency_policy, rate_limit_policy, Admission, AdmissionPolicy, AdmissionRequest,
    ConcurrencyLimit, FixedWindowRateLimit, PassThrough,
};
pub use rate_limit::TokenBucketRateLimit;
pub use store::{connect_counter_store, CounterStore, MemoryCounterStore, RedisCounterStore};
pub use token::{Claims, TokenAuthority};
