//! Core types shared by every socialgate crate.
//!
//! This crate has no HTTP framework dependency. It defines the error taxonomy
//! the gateway reports to clients, the table of backend services the router
//! forwards to, and the immutable configuration object that is threaded
//! through the verifier, forwarder, aggregator and admission hooks.
//!
//! # Main types
//!
//! - [`GatewayError`]: Error taxonomy with a fixed HTTP status per variant.
//! - [`GatewayResult`]: Convenience alias for `Result<T, GatewayError>`.
//! - [`BackendDomain`]: The seven logical backend services.
//! - [`BackendTargets`]: Base URL for each backend domain.
//! - [`GatewayConfig`]: Complete, validated process configuration.

/// Backend domains and their base URLs.
pub mod backend;
/// Gateway configuration sections and validation.
pub mod config;
/// Error taxonomy.
pub mod error;

pub use backend::{BackendDomain, BackendTargets};
pub use config::{
    AdmissionConfig, AuthConfig, ConcurrencyPolicyConfig, CounterStoreKind, GatewayConfig,
    ProxyConfig, RateLimitPolicyConfig, SearchConfig, ServerConfig,
};
pub use error::{GatewayError, GatewayResult};
