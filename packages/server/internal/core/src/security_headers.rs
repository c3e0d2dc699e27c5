//! Security response headers
//!
//! Header policy applied by the HTTP portal's security-headers middleware.
//! Each `None` field suppresses its header.

use serde::{Deserialize, Serialize};

/// Security headers configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    /// X-Frame-Options value (default: "DENY")
    #[serde(default = "default_frame_options")]
    pub frame_options: Option<String>,

    /// X-Content-Type-Options (default: "nosniff")
    #[serde(default = "default_content_type_options")]
    pub content_type_options: Option<String>,

    /// X-XSS-Protection (default: "1; mode=block")
    #[serde(default = "default_xss_protection")]
    pub xss_protection: Option<String>,

    /// HSTS configuration
    #[serde(default)]
    pub hsts: Option<HstsConfig>,

    /// Content-Security-Policy (no default - must be explicitly configured)
    pub content_security_policy: Option<String>,

    /// Referrer-Policy (default: "strict-origin-when-cross-origin")
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: Option<String>,

    /// X-Permitted-Cross-Domain-Policies (default: "none")
    #[serde(default = "default_cross_domain_policies")]
    pub cross_domain_policies: Option<String>,

    /// X-Download-Options (default: "noopen")
    #[serde(default = "default_download_options")]
    pub download_options: Option<String>,
}

/// HTTP Strict Transport Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HstsConfig {
    /// max-age in seconds (default: 31536000 = 1 year)
    #[serde(default = "default_hsts_max_age")]
    pub max_age: u64,

    /// Include subdomains (default: true)
    #[serde(default = "default_true")]
    pub include_sub_domains: bool,

    /// Preload flag (default: false)
    #[serde(default)]
    pub preload: bool,
}

// Default value functions
fn default_frame_options() -> Option<String> {
    Some("DENY".to_string())
}
fn default_content_type_options() -> Option<String> {
    Some("nosniff".to_string())
}
fn default_xss_protection() -> Option<String> {
    Some("1; mode=block".to_string())
}
fn default_referrer_policy() -> Option<String> {
    Some("strict-origin-when-cross-origin".to_string())
}
fn default_cross_domain_policies() -> Option<String> {
    Some("none".to_string())
}
fn default_download_options() -> Option<String> {
    Some("noopen".to_string())
}
fn default_hsts_max_age() -> u64 {
    31536000 // 1 year
}
fn default_true() -> bool {
    true
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            frame_options: default_frame_options(),
            content_type_options: default_content_type_options(),
            xss_protection: default_xss_protection(),
            hsts: Some(HstsConfig::default()),
            content_security_policy: None, // Must be explicitly configured
            referrer_policy: default_referrer_policy(),
            cross_domain_policies: default_cross_domain_policies(),
            download_options: default_download_options(),
        }
    }
}

impl Default for HstsConfig {
    fn default() -> Self {
        Self {
            max_age: default_hsts_max_age(),
            include_sub_domains: true,
            preload: false,
        }
    }
}

impl SecurityHeadersConfig {
    /// Set Content-Security-Policy
    pub fn content_security_policy(mut self, value: impl Into<String>) -> Self {
        self.content_security_policy = Some(value.into());
        self
    }

    /// Drop X-Frame-Options
    pub fn no_frame_options(mut self) -> Self {
        self.frame_options = None;
        self
    }

    /// Drop Strict-Transport-Security (plain HTTP deployments)
    pub fn no_hsts(mut self) -> Self {
        self.hsts = None;
        self
    }

    /// Header pairs to add to every response
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(8);

        if let Some(ref value) = self.frame_options {
            headers.push(("X-Frame-Options", value.clone()));
        }
        if let Some(ref value) = self.content_type_options {
            headers.push(("X-Content-Type-Options", value.clone()));
        }
        if let Some(ref value) = self.xss_protection {
            headers.push(("X-XSS-Protection", value.clone()));
        }
        if let Some(ref hsts) = self.hsts {
            let mut hsts_value = format!("max-age={}", hsts.max_age);
            if hsts.include_sub_domains {
                hsts_value.push_str("; includeSubDomains");
            }
            if hsts.preload {
                hsts_value.push_str("; preload");
            }
            headers.push(("Strict-Transport-Security", hsts_value));
        }
        if let Some(ref value) = self.content_security_policy {
            headers.push(("Content-Security-Policy", value.clone()));
        }
        if let Some(ref value) = self.referrer_policy {
            headers.push(("Referrer-Policy", value.clone()));
        }
        if let Some(ref value) = self.cross_domain_policies {
            headers.push(("X-Permitted-Cross-Domain-Policies", value.clone()));
        }
        if let Some(ref value) = self.download_options {
            headers.push(("X-Download-Options", value.clone()));
        }

        headers
    }
}
