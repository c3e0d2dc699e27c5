//! CORS policy
//!
//! Computes the `Access-Control-*` headers for preflight and regular
//! responses. The HTTP portal answers `OPTIONS` preflights from this policy
//! without reaching any handler.

use serde::{Deserialize, Serialize};

/// CORS configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any (default: `["*"]`)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Allowed methods (default: GET, POST, OPTIONS)
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers (default: Content-Type, Authorization)
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Preflight cache lifetime in seconds (default: 86400)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Send `Access-Control-Allow-Credentials: true`
    #[serde(default)]
    pub allow_credentials: bool,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_allowed_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()]
}
fn default_allowed_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}
fn default_max_age_secs() -> u64 {
    86400
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            max_age_secs: default_max_age_secs(),
            allow_credentials: false,
        }
    }
}

impl CorsConfig {
    /// Restrict to an explicit origin allow-list
    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` when the origin is
    /// not allowed.
    ///
    /// A wildcard policy answers `*` unless credentials are enabled, in which
    /// case the request origin is echoed back.
    pub fn allow_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.allows_any() {
            return match (self.allow_credentials, origin) {
                (true, Some(origin)) => Some(origin.to_string()),
                _ => Some("*".to_string()),
            };
        }
        let origin = origin?;
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            .then(|| origin.to_string())
    }

    /// Headers for an `OPTIONS` preflight response
    pub fn preflight_headers(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(5);
        if let Some(allowed) = self.allow_origin(origin) {
            headers.push(("Access-Control-Allow-Origin", allowed));
        }
        headers.push((
            "Access-Control-Allow-Methods",
            self.allowed_methods.join(", "),
        ));
        headers.push((
            "Access-Control-Allow-Headers",
            self.allowed_headers.join(", "),
        ));
        headers.push(("Access-Control-Max-Age", self.max_age_secs.to_string()));
        if self.allow_credentials {
            headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
        }
        headers
    }

    /// Headers added to regular responses for a cross-origin request
    pub fn response_headers(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(3);
        if origin.is_none() {
            return headers;
        }
        if let Some(allowed) = self.allow_origin(origin) {
            if allowed != "*" {
                headers.push(("Vary", "Origin".to_string()));
            }
            headers.push(("Access-Control-Allow-Origin", allowed));
            if self.allow_credentials {
                headers.push(("Access-Control-Allow-Credentials", "true".to_string()));
            }
        }
        headers
    }
}
