use std::path::PathBuf;

use crate::models::retry::RetryConfig;

pub const PRODUCTION_ENDPOINT: &str = "https://api.push.apple.com";
pub const SANDBOX_ENDPOINT: &str = "https://api.sandbox.push.apple.com";

/// Everything needed to open a gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub certificate_path: PathBuf,
    pub password: String,
    pub production: bool,
    pub topic: Option<String>,
    pub endpoint_override: Option<String>,
    pub resend_buffer: usize,
    pub retry: RetryConfig,
}

impl GatewaySettings {
    pub fn endpoint(&self) -> &str {
        match &self.endpoint_override {
            Some(url) => url.trim_end_matches('/'),
            None if self.production => PRODUCTION_ENDPOINT,
            None => SANDBOX_ENDPOINT,
        }
    }
}

/// Per-deployment content rules applied to every payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPolicy {
    pub badge: u32,
    pub sound: String,
    pub send_message_body: bool,
    pub message_body_placeholder: String,
    pub size_limit: usize,
}

impl PayloadPolicy {
    /// The text that stands in for `body` in the alert.
    pub fn message_text<'a>(&'a self, body: &'a str) -> &'a str {
        if self.send_message_body {
            body
        } else {
            &self.message_body_placeholder
        }
    }
}
