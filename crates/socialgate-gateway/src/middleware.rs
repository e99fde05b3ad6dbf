use crate::error::{json_error, ApiError};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use socialgate_security::{
    Admission, AdmissionPolicy, AdmissionRequest, CounterStore, TokenAuthority,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

/// The two admission hooks and the counter store they share.
#[derive(Clone)]
pub struct AdmissionHooks {
    pub rate_limit: Arc<dyn AdmissionPolicy>,
    pub concurrency: Arc<dyn AdmissionPolicy>,
    pub store: Arc<dyn CounterStore>,
}

/// Rate-limit hook. Runs before the concurrency hook and before auth.
pub async fn rate_limit_middleware(
    State(hooks): State<Arc<AdmissionHooks>>,
    request: Request,
    next: Next,
) -> Response {
    run_hook(hooks.rate_limit.clone(), hooks.store.clone(), request, next).await
}

/// Concurrency-limit hook.
pub async fn concurrency_middleware(
    State(hooks): State<Arc<AdmissionHooks>>,
    request: Request,
    next: Next,
) -> Response {
    run_hook(hooks.concurrency.clone(), hooks.store.clone(), request, next).await
}

/// Releases an admitted request exactly once.
///
/// The normal path awaits [`ReleaseGuard::release`]. If the request future is
/// dropped first (client disconnect, panic) the release runs on a spawned task.
struct ReleaseGuard {
    inner: Option<(Arc<dyn AdmissionPolicy>, Arc<dyn CounterStore>, AdmissionRequest)>,
}

impl ReleaseGuard {
    fn new(
        policy: Arc<dyn AdmissionPolicy>,
        store: Arc<dyn CounterStore>,
        request: AdmissionRequest,
    ) -> Self {
        Self {
            inner: Some((policy, store, request)),
        }
    }

    async fn release(mut self) {
        if let Some((policy, store, request)) = self.inner.take() {
            policy.release(&request, store.as_ref()).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some((policy, store, request)) = self.inner.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    policy = policy.name(),
                    client = %request.client_key,
                    "Request abandoned, releasing admission in background"
                );
                handle.spawn(async move {
                    policy.release(&request, store.as_ref()).await;
                });
            }
            Err(_) => warn!(
                policy = policy.name(),
                client = %request.client_key,
                "No runtime to release abandoned request"
            ),
        }
    }
}

async fn run_hook(
    policy: Arc<dyn AdmissionPolicy>,
    store: Arc<dyn CounterStore>,
    request: Request,
    next: Next,
) -> Response {
    let admission_request = AdmissionRequest::new(
        request.method().as_str(),
        request.uri().path(),
        client_key(&request),
    );

    match policy.admit(&admission_request, store.as_ref()).await {
        Admission::Admit => {
            let guard = ReleaseGuard::new(policy, store, admission_request);
            let response = next.run(request).await;
            guard.release().await;
            response
        }
        Admission::Reject { status, reason } => {
            warn!(
                policy = policy.name(),
                client = %admission_request.client_key,
                path = %admission_request.path,
                status,
                "Request rejected by admission hook"
            );
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
            json_error(status, &reason)
        }
    }
}

/// Identity used for per-client accounting: first `X-Forwarded-For` hop,
/// else the peer IP, else `anonymous`.
fn client_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Auth middleware: verifies `Authorization: Bearer <token>`.
///
/// On success the verified [`socialgate_security::Claims`] are placed in the
/// request extensions. On failure the request never reaches routing.
pub async fn auth_middleware(
    State(tokens): State<Arc<TokenAuthority>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match tokens.verify(header_value) {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), reason = %e, "Rejected request");
            ApiError(e).into_response()
        }
    }
}

/// Permissive CORS defaults: any origin, the usual methods, and the headers
/// a browser client needs to call authenticated routes.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ])
        .max_age(Duration::from_secs(12 * 60 * 60))
}
