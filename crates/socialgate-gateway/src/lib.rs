//! HTTP surface of the socialgate API gateway.
//!
//! Requests pass through CORS, the rate-limit hook and the concurrency hook,
//! then (except for `/health` and `/login`) bearer-token verification, and
//! finally either the [`Forwarder`] for one of the seven backend prefixes or
//! the [`SearchAggregator`] for `/search`.

pub mod error;
pub mod middleware;
pub mod proxy;
pub mod search;
pub mod server;

pub use error::ApiError;
pub use middleware::AdmissionHooks;
pub use proxy::Forwarder;
pub use search::{AggregatedSearchResponse, SearchAggregator, SearchSource, SEARCH_BRANCHES};
pub use server::{AppState, GatewayServer};
