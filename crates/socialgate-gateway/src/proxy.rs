use crate::error::json_error;
use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{header, request::Parts, HeaderMap, HeaderName, StatusCode},
    response::Response,
};
use socialgate_core::{BackendDomain, BackendTargets};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Headers that describe a single connection and must not be relayed.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Transparent relay of one request to one backend.
///
/// Method, path, query, headers and body are preserved; the backend's
/// status, headers and body are returned unchanged. Failures reaching the
/// backend become a JSON error, never a dropped request.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    backends: Arc<BackendTargets>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, backends: Arc<BackendTargets>, timeout: Duration) -> Self {
        Self {
            client,
            backends,
            timeout,
        }
    }

    /// Relay `request` to the backend for `domain`.
    pub async fn forward(&self, domain: BackendDomain, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let url = self
            .backends
            .target_url(domain, parts.uri.path(), parts.uri.query());

        let outbound = match self.build_request(&parts, body, &url) {
            Ok(req) => req,
            Err(e) => {
                warn!(backend = %domain, error = %e, "Failed to build backend request");
                return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create request");
            }
        };

        let started = Instant::now();
        match self.client.execute(outbound).await {
            Ok(resp) => {
                debug!(
                    backend = %domain,
                    method = %parts.method,
                    path = %parts.uri.path(),
                    status = resp.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backend responded"
                );
                relay_response(resp)
            }
            Err(e) => {
                warn!(
                    backend = %domain,
                    path = %parts.uri.path(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "Backend unavailable"
                );
                json_error(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
            }
        }
    }

    fn build_request(
        &self,
        parts: &Parts,
        body: Body,
        url: &str,
    ) -> Result<reqwest::Request, reqwest::Error> {
        let mut builder = self
            .client
            .request(parts.method.clone(), url)
            .timeout(self.timeout)
            .headers(relayable_headers(&parts.headers, true));

        // Known-empty bodies stay empty so GETs are not sent chunked.
        if body.size_hint().exact() != Some(0) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        builder.build()
    }
}

/// Copy every header except hop-by-hop ones (and `Host` for outbound
/// requests, which is derived from the backend URL). Multi-valued headers
/// keep all their values; names are already case-normalised by `HeaderMap`.
fn relayable_headers(source: &HeaderMap, strip_host: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if is_hop_by_hop(name) || (strip_host && *name == header::HOST) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn relay_response(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let headers = relayable_headers(resp.headers(), false);

    let mut response = Response::new(Body::from_stream(resp.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
