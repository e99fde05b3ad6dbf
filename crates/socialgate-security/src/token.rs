use jsonwebtoken::{
    decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use serde::{Deserialize, Serialize};
use socialgate_core::{AuthConfig, GatewayError, GatewayResult};
use std::collections::HashSet;
use tracing::debug;

/// Claims carried by a gateway token.
///
/// Only `email` is set by the login stand-in; other registered claims are
/// optional so tokens minted elsewhere with the same secret still verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Any other claims present in the token.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies and mints HMAC-signed bearer tokens with a shared secret.
///
/// Stateless: nothing about a verified token is retained.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
    identity: String,
}

impl TokenAuthority {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // `exp` is still enforced when present.
        validation.required_spec_claims = HashSet::new();
        validation.validate_aud = false;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs: config.token_ttl_secs,
            identity: config.login_identity.clone(),
        }
    }

    /// Verify a raw `Authorization` header value.
    ///
    /// A leading `Bearer ` is stripped if present. Fails with
    /// [`GatewayError::Unauthenticated`] when the value is empty, malformed,
    /// expired, signed with another secret or with a non-HMAC algorithm.
    pub fn verify(&self, header_value: &str) -> GatewayResult<Claims> {
        let token = header_value
            .strip_prefix("Bearer ")
            .unwrap_or(header_value)
            .trim();
        if token.is_empty() {
            return Err(GatewayError::Unauthenticated(
                "Authorization token not provided".to_string(),
            ));
        }

        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                GatewayError::Unauthenticated("Invalid token".to_string())
            })
    }

    /// Mint a token for the configured login identity.
    pub fn issue(&self) -> GatewayResult<String> {
        let now = get_current_timestamp();
        let claims = Claims {
            email: Some(self.identity.clone()),
            iat: Some(now),
            exp: Some(now.saturating_add(self.ttl_secs)),
            extra: serde_json::Map::new(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("Failed to create token: {e}")))
    }
}
