use axum::http::{header, HeaderValue};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Map, Value};
use socialgate_core::{BackendDomain, BackendTargets, GatewayError, GatewayResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Number of concurrent lookups issued per search.
pub const SEARCH_BRANCHES: usize = 3;

/// One branch of the search fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SearchSource {
    /// Keyword search on the user service.
    Users,
    /// Full-text keyword search on the post service.
    PostsContent,
    /// Exact category match on the post service, using the query as the
    /// category name.
    PostsCategory,
}

impl SearchSource {
    pub const ALL: [SearchSource; SEARCH_BRANCHES] =
        [Self::Users, Self::PostsContent, Self::PostsCategory];

    /// Key of this branch in the aggregated response.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::PostsContent => "posts_content",
            Self::PostsCategory => "posts_category",
        }
    }

    fn rejected_message(self) -> &'static str {
        match self {
            Self::Users => "Failed to search users",
            Self::PostsContent => "Failed to search posts",
            Self::PostsCategory => "Failed to search categories",
        }
    }

    /// Backend URL for this branch. The query is percent-encoded as a query
    /// pair or a path segment. `.` and `..` cannot be carried as a category
    /// segment, so that branch has no URL for them.
    fn url(self, backends: &BackendTargets, query: &str) -> Option<Url> {
        match self {
            Self::Users => {
                let base = backends.base_url(BackendDomain::User);
                let mut url = Url::parse(&format!("{base}/auth/search")).ok()?;
                url.query_pairs_mut().append_pair("query", query);
                Some(url)
            }
            Self::PostsContent => {
                let base = backends.base_url(BackendDomain::Post);
                let mut url = Url::parse(&format!("{base}/post/search/keyword")).ok()?;
                url.query_pairs_mut().append_pair("keyword", query);
                Some(url)
            }
            Self::PostsCategory => {
                if matches!(query, "." | "..") {
                    return None;
                }
                let base = backends.base_url(BackendDomain::Post);
                let mut url = Url::parse(&format!("{base}/post/search/category")).ok()?;
                url.path_segments_mut().ok()?.push(query);
                Some(url)
            }
        }
    }
}

/// Outcome reported by exactly one branch.
#[derive(Debug)]
struct SearchBranchResult {
    source: SearchSource,
    outcome: Result<Value, String>,
}

/// Merged answer for one search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSearchResponse {
    pub query: String,
    /// Source tag to backend payload, or `{"error": "..."}` for a failed branch.
    pub results: Map<String, Value>,
}

/// Fans one query out to the user and post services and merges the answers.
///
/// Every branch is bounded by its own timeout; a failed branch becomes an
/// error entry in the response and never fails the search as a whole.
#[derive(Clone)]
pub struct SearchAggregator {
    client: reqwest::Client,
    backends: Arc<BackendTargets>,
    branch_timeout: Duration,
    deadline: Option<Duration>,
}

impl SearchAggregator {
    /// `deadline` caps the whole fan-out; `None` waits for every branch.
    pub fn new(
        client: reqwest::Client,
        backends: Arc<BackendTargets>,
        branch_timeout: Duration,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            client,
            backends,
            branch_timeout,
            deadline,
        }
    }

    /// Run the three lookups concurrently and merge them.
    ///
    /// `authorization` is forwarded verbatim to each backend. An empty query
    /// fails with [`GatewayError::InvalidRequest`] before any call is made.
    pub async fn search(
        &self,
        query: &str,
        authorization: Option<&HeaderValue>,
    ) -> GatewayResult<AggregatedSearchResponse> {
        if query.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Search query parameter is required".to_string(),
            ));
        }

        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel::<SearchBranchResult>(SEARCH_BRANCHES);

        for source in SearchSource::ALL {
            let tx = tx.clone();
            let client = self.client.clone();
            let backends = self.backends.clone();
            let query = query.to_string();
            let authorization = authorization.cloned();
            let timeout = self.branch_timeout;

            tokio::spawn(async move {
                let outcome = run_branch(
                    &client,
                    &backends,
                    source,
                    &query,
                    authorization.as_ref(),
                    timeout,
                )
                .await
                .map_err(str::to_string);
                let _ = tx.send(SearchBranchResult { source, outcome }).await;
            });
        }
        drop(tx);

        let mut reported: BTreeMap<SearchSource, Result<Value, String>> = BTreeMap::new();
        let collect = async {
            while reported.len() < SEARCH_BRANCHES {
                match rx.recv().await {
                    Some(result) => {
                        reported.insert(result.source, result.outcome);
                    }
                    None => break,
                }
            }
        };
        let timed_out = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, collect).await.is_err(),
            None => {
                collect.await;
                false
            }
        };

        let mut results = Map::new();
        let mut failed = 0usize;
        for source in SearchSource::ALL {
            let value = match reported.remove(&source) {
                Some(Ok(data)) => data,
                Some(Err(message)) => {
                    failed += 1;
                    json!({ "error": message })
                }
                None => {
                    failed += 1;
                    let message = if timed_out {
                        "Search timed out"
                    } else {
                        "Search branch failed"
                    };
                    warn!(source = source.tag(), reason = message, "Search branch did not report");
                    json!({ "error": message })
                }
            };
            results.insert(source.tag().to_string(), value);
        }

        info!(
            failed,
            timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search aggregated"
        );

        Ok(AggregatedSearchResponse {
            query: query.to_string(),
            results,
        })
    }
}

/// One branch lookup. Always yields exactly one outcome.
async fn run_branch(
    client: &reqwest::Client,
    backends: &BackendTargets,
    source: SearchSource,
    query: &str,
    authorization: Option<&HeaderValue>,
    timeout: Duration,
) -> Result<Value, &'static str> {
    let url = source
        .url(backends, query)
        .ok_or("Failed to create request")?;

    let mut request = client.get(url).timeout(timeout);
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value.clone());
    }

    let resp = request.send().await.map_err(|e| {
        warn!(
            source = source.tag(),
            timeout = e.is_timeout(),
            error = %e,
            "Search branch unavailable"
        );
        "Service unavailable"
    })?;
    if !resp.status().is_success() {
        warn!(
            source = source.tag(),
            status = resp.status().as_u16(),
            "Search branch rejected"
        );
        return Err(source.rejected_message());
    }

    let body = resp.bytes().await.map_err(|e| {
        warn!(source = source.tag(), error = %e, "Search branch body failed");
        "Service unavailable"
    })?;
    // Undecodable payloads are reported as null rather than failing the branch.
    Ok(serde_json::from_slice(&body).unwrap_or(Value::Null))
}
