use crate::backend::{BackendDomain, BackendTargets};
use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::time::Duration;

/// Complete gateway configuration.
///
/// Every section has defaults so that a partial TOML file (or none at all,
/// with everything supplied through the environment) is accepted. Call
/// [`GatewayConfig::validate`] before using it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backends: BackendTargets,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Listener address.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Credential signing and verification.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC secret. Required.
    #[serde(default)]
    pub jwt_secret: String,
    /// Lifetime of tokens minted by `/login`.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Identity placed in the `email` claim of minted tokens.
    #[serde(default = "default_login_identity")]
    pub login_identity: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
            login_identity: default_login_identity(),
        }
    }
}

// The secret must never end up in logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("login_identity", &self.login_identity)
            .finish()
    }
}

/// Single-route forwarding.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Search fan-out.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Per-branch timeout.
    #[serde(default = "default_branch_timeout_secs")]
    pub branch_timeout_secs: u64,
    /// Outer ceiling on the whole fan-out. `0` waits for every branch
    /// without limit.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            branch_timeout_secs: default_branch_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl SearchConfig {
    pub fn branch_timeout(&self) -> Duration {
        Duration::from_secs(self.branch_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

/// Which counter store backs the admission hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStoreKind {
    #[default]
    Memory,
    Redis,
}

/// Rate-limit hook policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RateLimitPolicyConfig {
    /// Admit everything.
    #[default]
    None,
    /// At most `limit` requests per client per `window_secs`.
    FixedWindow { limit: u64, window_secs: u64 },
    /// Token bucket per client.
    TokenBucket { burst: f64, refill_per_sec: f64 },
}

/// Concurrency-limit hook policy.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ConcurrencyPolicyConfig {
    /// Admit everything.
    #[default]
    None,
    /// At most `max_in_flight` requests per client at once.
    MaxInFlight { max_in_flight: u64 },
}

/// Admission hooks and their shared counter store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub counter_store: CounterStoreKind,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitPolicyConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicyConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_token_ttl_secs() -> u64 {
    86_400
}
fn default_login_identity() -> String {
    "user@example.com".to_string()
}
fn default_proxy_timeout_secs() -> u64 {
    15
}
fn default_branch_timeout_secs() -> u64 {
    5
}
fn default_deadline_secs() -> u64 {
    10
}

impl GatewayConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> GatewayResult<Self> {
        toml::from_str(raw)
            .map_err(|e| GatewayError::Config(format!("failed to parse config: {e}")))
    }

    /// Layer environment variables on top of the current values.
    ///
    /// `lookup` abstracts the environment so callers and tests can supply
    /// their own source. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(secret) = get("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        for domain in BackendDomain::ALL {
            if let Some(url) = get(domain.env_var()) {
                *self.backends.slot_mut(domain) = url;
            }
        }
        if let Some(addr) = get("REDIS_ADDR") {
            self.admission.counter_store = CounterStoreKind::Redis;
            self.admission.redis_url = Some(if addr.contains("://") {
                addr
            } else {
                format!("redis://{addr}")
            });
        }
        if let Some(port) = get("GATEWAY_PORT") {
            self.server.port = port.trim().parse().map_err(|e| {
                GatewayError::Config(format!("GATEWAY_PORT '{port}' is not a valid port: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(GatewayError::Config(
                "auth.jwt_secret (or JWT_SECRET) must be set".to_string(),
            ));
        }
        self.backends.validate()?;

        if self.proxy.timeout_secs == 0 {
            return Err(GatewayError::Config(
                "proxy.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.search.branch_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "search.branch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.search.deadline_secs != 0
            && self.search.deadline_secs <= self.search.branch_timeout_secs
        {
            return Err(GatewayError::Config(format!(
                "search.deadline_secs ({}) must exceed search.branch_timeout_secs ({}) or be 0",
                self.search.deadline_secs, self.search.branch_timeout_secs
            )));
        }

        if self.admission.counter_store == CounterStoreKind::Redis
            && self.admission.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(GatewayError::Config(
                "admission.redis_url (or REDIS_ADDR) is required for the redis counter store"
                    .to_string(),
            ));
        }
        match &self.admission.rate_limit {
            RateLimitPolicyConfig::FixedWindow { limit, window_secs }
                if *limit == 0 || *window_secs == 0 =>
            {
                return Err(GatewayError::Config(
                    "fixed_window rate limit needs limit > 0 and window_secs > 0".to_string(),
                ));
            }
            RateLimitPolicyConfig::TokenBucket {
                burst,
                refill_per_sec,
            } if *burst < 1.0 || *refill_per_sec <= 0.0 => {
                return Err(GatewayError::Config(
                    "token_bucket rate limit needs burst >= 1 and refill_per_sec > 0".to_string(),
                ));
            }
            _ => {}
        }
        if self.admission.concurrency == (ConcurrencyPolicyConfig::MaxInFlight { max_in_flight: 0 })
        {
            return Err(GatewayError::Config(
                "max_in_flight concurrency limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        env.insert("JWT_SECRET", "s3cret".to_string());
        for domain in BackendDomain::ALL {
            env.insert(domain.env_var(), format!("http://{domain}:3000"));
        }
        env
    }

    fn from_env(env: &HashMap<&'static str, String>) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.apply_env(|k| env.get(k).cloned()).unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.proxy.timeout(), Duration::from_secs(15));
        assert_eq!(config.search.branch_timeout(), Duration::from_secs(5));
        assert_eq!(config.search.deadline(), Some(Duration::from_secs(10)));
        assert_eq!(config.admission.rate_limit, RateLimitPolicyConfig::None);
        assert_eq!(config.admission.concurrency, ConcurrencyPolicyConfig::None);
        assert_eq!(config.admission.counter_store, CounterStoreKind::Memory);
    }

    #[test]
    fn test_env_only_config_validates() {
        let config = from_env(&full_env());
        config.validate().unwrap();
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.backends.base_url(BackendDomain::Event), "http://event:3000");
    }

    #[test]
    fn test_missing_secret_rejected() {
        let mut env = full_env();
        env.remove("JWT_SECRET");
        let err = from_env(&env).validate().unwrap_err().to_string();
        assert!(err.contains("jwt_secret"), "unexpected error: {err}");
    }

    #[test]
    fn test_redis_addr_selects_redis_store() {
        let mut env = full_env();
        env.insert("REDIS_ADDR", "localhost:6379".to_string());
        let config = from_env(&env);
        assert_eq!(config.admission.counter_store, CounterStoreKind::Redis);
        assert_eq!(
            config.admission.redis_url.as_deref(),
            Some("redis://localhost:6379")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_gateway_port_rejected() {
        let mut env = full_env();
        env.insert("GATEWAY_PORT", "eighty".to_string());
        let mut config = GatewayConfig::default();
        assert!(config.apply_env(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn test_env_overrides_toml() {
        let mut config = GatewayConfig::from_toml_str(
            r#"
[server]
port = 9000

[backends]
user = "http://from-file:1"
"#,
        )
        .unwrap();
        let env = full_env();
        config.apply_env(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.backends.user, "http://user:3000");
    }

    #[test]
    fn test_toml_policies() {
        let config = GatewayConfig::from_toml_str(
            r#"
[admission]
counter_store = "redis"
redis_url = "redis://cache:6379"

[admission.rate_limit]
policy = "fixed_window"
limit = 100
window_secs = 60

[admission.concurrency]
policy = "max_in_flight"
max_in_flight = 8
"#,
        )
        .unwrap();
        assert_eq!(
            config.admission.rate_limit,
            RateLimitPolicyConfig::FixedWindow {
                limit: 100,
                window_secs: 60
            }
        );
        assert_eq!(
            config.admission.concurrency,
            ConcurrencyPolicyConfig::MaxInFlight { max_in_flight: 8 }
        );
    }

    #[test]
    fn test_deadline_must_exceed_branch_timeout() {
        let mut config = from_env(&full_env());
        config.search.deadline_secs = 5;
        assert!(config.validate().is_err());
        config.search.deadline_secs = 0;
        assert!(config.validate().is_ok());
        assert_eq!(config.search.deadline(), None);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = from_env(&full_env());
        config.admission.rate_limit = RateLimitPolicyConfig::FixedWindow {
            limit: 0,
            window_secs: 60,
        };
        assert!(config.validate().is_err());

        let mut config = from_env(&full_env());
        config.admission.concurrency = ConcurrencyPolicyConfig::MaxInFlight { max_in_flight: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = from_env(&full_env());
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_example_file_is_valid() {
        let raw = include_str!("../../../socialgate.example.toml");
        let config = GatewayConfig::from_toml_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.backends.analytics, "http://localhost:8087");
        assert_eq!(config.search.deadline(), Some(Duration::from_secs(10)));
    }
}
