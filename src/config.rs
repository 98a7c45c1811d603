use std::path::PathBuf;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    payload::DEFAULT_PAYLOAD_LIMIT,
    retry::RetryConfig,
    settings::{GatewaySettings, PayloadPolicy},
};

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_certificate_path")]
    pub apns_certificate_path: String,
    #[serde(default)]
    pub apns_password: String,
    #[serde(default)]
    pub apns_production: bool,
    #[serde(default)]
    pub apns_topic: Option<String>,
    #[serde(default)]
    pub apns_gateway_url: Option<String>,
    #[serde(default = "default_resend_buffer")]
    pub apns_resend_buffer: usize,

    #[serde(default = "default_badge")]
    pub apns_badge: u32,
    #[serde(default = "default_sound")]
    pub apns_sound: String,
    #[serde(default)]
    pub apns_send_message_body: bool,
    #[serde(default = "default_placeholder")]
    pub apns_message_body_placeholder: String,
    #[serde(default = "default_payload_limit")]
    pub apns_payload_limit: usize,

    pub database_url: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,
}

fn default_certificate_path() -> String {
    "/certificate.p12".to_string()
}

fn default_resend_buffer() -> usize {
    100
}

fn default_badge() -> u32 {
    1
}

fn default_sound() -> String {
    "default".to_string()
}

fn default_placeholder() -> String {
    "Sent message.".to_string()
}

fn default_payload_limit() -> usize {
    DEFAULT_PAYLOAD_LIMIT
}

fn default_server_port() -> u16 {
    8080
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apns_certificate_path: default_certificate_path(),
            apns_password: String::new(),
            apns_production: false,
            apns_topic: None,
            apns_gateway_url: None,
            apns_resend_buffer: default_resend_buffer(),
            apns_badge: default_badge(),
            apns_sound: default_sound(),
            apns_send_message_body: false,
            apns_message_body_placeholder: default_placeholder(),
            apns_payload_limit: default_payload_limit(),
            database_url: String::new(),
            server_port: default_server_port(),
            max_retry_attempts: default_max_retry_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.apns_payload_limit == 0 {
            return Err(anyhow!("APNS_PAYLOAD_LIMIT must be greater than zero"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            certificate_path: PathBuf::from(&self.apns_certificate_path),
            password: self.apns_password.clone(),
            production: self.apns_production,
            topic: self.apns_topic.clone().filter(|t| !t.is_empty()),
            endpoint_override: self.apns_gateway_url.clone().filter(|u| !u.is_empty()),
            resend_buffer: self.apns_resend_buffer.max(1),
            retry: self.retry_config(),
        }
    }

    pub fn payload_policy(&self) -> PayloadPolicy {
        PayloadPolicy {
            badge: self.apns_badge,
            sound: self.apns_sound.clone(),
            send_message_body: self.apns_send_message_body,
            message_body_placeholder: self.apns_message_body_placeholder.clone(),
            size_limit: self.apns_payload_limit,
        }
    }
}
