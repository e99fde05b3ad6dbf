use thiserror::Error;

/// Convenience alias used by every fallible socialgate function.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the gateway.
///
/// The first five variants are the client-facing taxonomy; each maps to a
/// fixed HTTP status via [`GatewayError::status_code`]. The remaining variants
/// are local plumbing failures and all surface as internal errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing, malformed, expired or badly signed credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Malformed client input, rejected before any backend call.
    #[error("{0}")]
    InvalidRequest(String),

    /// Network failure or timeout while reaching a backend.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Local failure building a request or signing a token.
    #[error("{0}")]
    Internal(String),

    /// Path prefix is not in the route table.
    #[error("{0}")]
    RouteNotFound(String),

    /// Invalid or incomplete configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// The admission counter store could not be reached.
    #[error("Counter store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status code reported to the client for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::InvalidRequest(_) => 400,
            Self::RouteNotFound(_) => 404,
            Self::UpstreamUnavailable(_) => 503,
            Self::Internal(_)
            | Self::Config(_)
            | Self::Store(_)
            | Self::Serialization(_)
            | Self::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(GatewayError::Unauthenticated("x".into()).status_code(), 401);
        assert_eq!(GatewayError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(GatewayError::RouteNotFound("x".into()).status_code(), 404);
        assert_eq!(
            GatewayError::UpstreamUnavailable("x".into()).status_code(),
            503
        );
        assert_eq!(GatewayError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_plumbing_errors_are_internal() {
        assert_eq!(GatewayError::Config("x".into()).status_code(), 500);
        assert_eq!(GatewayError::Store("x".into()).status_code(), 500);
    }

    #[test]
    fn test_client_facing_display_is_bare_message() {
        let err = GatewayError::Unauthenticated("Invalid token".into());
        assert_eq!(err.to_string(), "Invalid token");
    }
}
