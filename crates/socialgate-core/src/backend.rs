use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::fmt;
use url::Url;

/// One of the seven backend services the gateway proxies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendDomain {
    User,
    Post,
    Chat,
    Dashboard,
    Notification,
    Event,
    Analytics,
}

impl BackendDomain {
    /// Every domain, in route-table order.
    pub const ALL: [BackendDomain; 7] = [
        Self::User,
        Self::Post,
        Self::Chat,
        Self::Dashboard,
        Self::Notification,
        Self::Event,
        Self::Analytics,
    ];

    /// Lower-case name, also the first path segment routed to this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Post => "post",
            Self::Chat => "chat",
            Self::Dashboard => "dashboard",
            Self::Notification => "notification",
            Self::Event => "event",
            Self::Analytics => "analytics",
        }
    }

    /// Path prefix routed to this domain, e.g. `/user`.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::User => "/user",
            Self::Post => "/post",
            Self::Chat => "/chat",
            Self::Dashboard => "/dashboard",
            Self::Notification => "/notification",
            Self::Event => "/event",
            Self::Analytics => "/analytics",
        }
    }

    /// Environment variable carrying this domain's base URL.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::User => "USER_SERVICE_URL",
            Self::Post => "POST_SERVICE_URL",
            Self::Chat => "CHAT_SERVICE_URL",
            Self::Dashboard => "DASHBOARD_SERVICE_URL",
            Self::Notification => "NOTIFICATION_SERVICE_URL",
            Self::Event => "EVENT_SERVICE_URL",
            Self::Analytics => "ANALYTICS_SERVICE_URL",
        }
    }
}

impl fmt::Display for BackendDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URL of every backend service.
///
/// Loaded once at start-up and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendTargets {
    pub user: String,
    pub post: String,
    pub chat: String,
    pub dashboard: String,
    pub notification: String,
    pub event: String,
    pub analytics: String,
}

impl BackendTargets {
    /// Base URL configured for `domain`, without a trailing slash.
    pub fn base_url(&self, domain: BackendDomain) -> &str {
        let raw = match domain {
            BackendDomain::User => &self.user,
            BackendDomain::Post => &self.post,
            BackendDomain::Chat => &self.chat,
            BackendDomain::Dashboard => &self.dashboard,
            BackendDomain::Notification => &self.notification,
            BackendDomain::Event => &self.event,
            BackendDomain::Analytics => &self.analytics,
        };
        raw.trim_end_matches('/')
    }

    /// Mutable slot for `domain`, used when layering environment overrides.
    pub fn slot_mut(&mut self, domain: BackendDomain) -> &mut String {
        match domain {
            BackendDomain::User => &mut self.user,
            BackendDomain::Post => &mut self.post,
            BackendDomain::Chat => &mut self.chat,
            BackendDomain::Dashboard => &mut self.dashboard,
            BackendDomain::Notification => &mut self.notification,
            BackendDomain::Event => &mut self.event,
            BackendDomain::Analytics => &mut self.analytics,
        }
    }

    /// Build the full backend URL for an inbound path and raw query string.
    ///
    /// The query is appended verbatim when non-empty.
    pub fn target_url(&self, domain: BackendDomain, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}{}", self.base_url(domain), path);
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Check that every domain has an absolute http(s) base URL.
    pub fn validate(&self) -> GatewayResult<()> {
        for domain in BackendDomain::ALL {
            let raw = self.base_url(domain);
            if raw.is_empty() {
                return Err(GatewayError::Config(format!(
                    "missing base URL for '{domain}' backend (set backends.{domain} or {})",
                    domain.env_var()
                )));
            }
            let parsed = Url::parse(raw).map_err(|e| {
                GatewayError::Config(format!("invalid base URL for '{domain}' backend: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(GatewayError::Config(format!(
                    "base URL for '{domain}' backend must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn targets() -> BackendTargets {
        let mut t = BackendTargets::default();
        for domain in BackendDomain::ALL {
            *t.slot_mut(domain) = format!("http://{domain}.internal:9000");
        }
        t
    }

    #[test]
    fn test_prefix_and_name_agree() {
        for domain in BackendDomain::ALL {
            assert_eq!(domain.prefix(), format!("/{}", domain.as_str()));
        }
    }

    #[test]
    fn test_target_url_appends_query_verbatim() {
        let t = targets();
        assert_eq!(
            t.target_url(BackendDomain::User, "/user/profile", Some("x=1&y=%20z")),
            "http://user.internal:9000/user/profile?x=1&y=%20z"
        );
        assert_eq!(
            t.target_url(BackendDomain::Chat, "/chat/rooms", Some("")),
            "http://chat.internal:9000/chat/rooms"
        );
        assert_eq!(
            t.target_url(BackendDomain::Chat, "/chat/rooms", None),
            "http://chat.internal:9000/chat/rooms"
        );
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        let mut t = targets();
        t.post = "http://post.internal:9000/".to_string();
        assert_eq!(t.base_url(BackendDomain::Post), "http://post.internal:9000");
    }

    #[test]
    fn test_validate_accepts_complete_table() {
        assert!(targets().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_backend() {
        let mut t = targets();
        t.event.clear();
        let err = t.validate().unwrap_err().to_string();
        assert!(err.contains("event"), "unexpected error: {err}");
        assert!(err.contains("EVENT_SERVICE_URL"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_non_http_scheme() {
        let mut t = targets();
        t.chat = "ftp://chat.internal".to_string();
        assert!(t.validate().is_err());
    }
}
