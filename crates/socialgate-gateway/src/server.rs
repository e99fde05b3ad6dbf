use crate::error::{json_error, ApiError};
use crate::middleware::{
    auth_middleware, concurrency_middleware, cors_layer, rate_limit_middleware, AdmissionHooks,
};
use crate::proxy::Forwarder;
use crate::search::SearchAggregator;
use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use socialgate_core::{BackendDomain, GatewayConfig, GatewayError, GatewayResult};
use socialgate_security::{
    concurrency_policy, rate_limit_policy, CounterStore, TokenAuthority,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state.
pub struct AppState {
    pub forwarder: Forwarder,
    pub search: SearchAggregator,
    pub tokens: Arc<TokenAuthority>,
}

/// The gateway application.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway with the admission policies named in `config`.
    pub fn build(config: &GatewayConfig, store: Arc<dyn CounterStore>) -> GatewayResult<Router> {
        let hooks = AdmissionHooks {
            rate_limit: rate_limit_policy(&config.admission.rate_limit),
            concurrency: concurrency_policy(&config.admission.concurrency),
            store,
        };
        Self::build_with_hooks(config, hooks)
    }

    /// Build the gateway with explicit admission hooks.
    ///
    /// Layer order, outermost first: tracing, CORS, rate-limit hook,
    /// concurrency hook, then the route table. Every route except `/health`
    /// and `/login` additionally requires a valid bearer token. Paths outside
    /// the table get a plain 404; there is no fallback backend.
    pub fn build_with_hooks(config: &GatewayConfig, hooks: AdmissionHooks) -> GatewayResult<Router> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        let backends = Arc::new(config.backends.clone());
        let tokens = Arc::new(TokenAuthority::new(&config.auth));

        let state = Arc::new(AppState {
            forwarder: Forwarder::new(client.clone(), backends.clone(), config.proxy.timeout()),
            search: SearchAggregator::new(
                client,
                backends,
                config.search.branch_timeout(),
                config.search.deadline(),
            ),
            tokens: tokens.clone(),
        });

        let mut protected = Router::new().route("/search", get(search_handler));
        for domain in BackendDomain::ALL {
            let prefix = domain.prefix();
            let proxy = move |State(state): State<Arc<AppState>>, request: Request| async move {
                state.forwarder.forward(domain, request).await
            };
            protected = protected
                .route(prefix, any(proxy))
                .route(&format!("{prefix}/"), any(proxy))
                .route(&format!("{prefix}/{{*rest}}"), any(proxy));
        }
        let protected =
            protected.route_layer(axum_mw::from_fn_with_state(tokens, auth_middleware));

        info!(
            rate_limit = hooks.rate_limit.name(),
            concurrency = hooks.concurrency.name(),
            "Admission hooks installed"
        );
        let hooks = Arc::new(hooks);

        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/login", post(login_handler))
            .merge(protected)
            .with_state(state)
            .layer(axum_mw::from_fn_with_state(
                hooks.clone(),
                concurrency_middleware,
            ))
            .layer(axum_mw::from_fn_with_state(hooks, rate_limit_middleware))
            .layer(cors_layer())
            .layer(TraceLayer::new_for_http());

        Ok(app)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "API Gateway is running"}))
}

/// Stand-in for the OAuth exchange: mints a token for the configured identity.
async fn login_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.tokens.issue() {
        Ok(token) => Json(serde_json::json!({ "token": token })).into_response(),
        Err(e) => {
            error!(error = %e, "Token signing failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
        }
    }
}

/// First `query` value, as repeated keys are allowed in a query string.
fn first_query(pairs: &[(String, String)]) -> &str {
    pairs
        .iter()
        .find(|(key, _)| key == "query")
        .map_or("", |(_, value)| value.as_str())
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let pairs = params.map(|Query(pairs)| pairs).unwrap_or_default();

    match state
        .search
        .search(first_query(&pairs), headers.get(header::AUTHORIZATION))
        .await
    {
        Ok(aggregated) => Json(aggregated).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use socialgate_security::MemoryCounterStore;
    use tower::ServiceExt;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "unit-secret".to_string();
        for domain in BackendDomain::ALL {
            *config.backends.slot_mut(domain) = "http://127.0.0.1:1".to_string();
        }
        config
    }

    fn app() -> Router {
        GatewayServer::build(&config(), Arc::new(MemoryCounterStore::new())).unwrap()
    }

    async fn send(app: Router, method: &str, uri: &str) -> Response {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = send(app(), "GET", "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_is_public_and_returns_token() {
        let response = send(app(), "POST", "/login").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let token = body["token"].as_str().unwrap();
        assert!(TokenAuthority::new(&config().auth).verify(token).is_ok());
    }

    #[tokio::test]
    async fn test_every_prefix_requires_auth() {
        for domain in BackendDomain::ALL {
            for uri in [
                domain.prefix().to_string(),
                format!("{}/", domain.prefix()),
                format!("{}/a/b", domain.prefix()),
            ] {
                let response = send(app(), "GET", &uri).await;
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            }
        }
        let response = send(app(), "GET", "/search?query=x").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_first_query_value_wins() {
        let pairs = vec![
            ("page".to_string(), "2".to_string()),
            ("query".to_string(), "alice".to_string()),
            ("query".to_string(), "bob".to_string()),
        ];
        assert_eq!(first_query(&pairs), "alice");
        assert_eq!(first_query(&pairs[..1]), "");
    }

    #[tokio::test]
    async fn test_repeated_query_key_is_accepted() {
        let token = TokenAuthority::new(&config().auth).issue().unwrap();
        let request = axum::http::Request::builder()
            .uri("/search?query=alice&query=bob")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["query"], "alice");
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_404() {
        for uri in ["/users/1", "/admin", "/"] {
            let response = send(app(), "GET", uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_cors_preflight_answered_before_auth() {
        let request = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/user/profile")
            .header("origin", "https://app.example.com")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }
}
