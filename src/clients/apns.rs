use std::time::Duration;

use reqwest::{Client, Identity, header::CONTENT_TYPE};
use tracing::{debug, info};

use crate::{
    clients::gateway::GatewayError,
    models::{
        feedback::{DeliveryError, GatewayErrorResponse, NotificationId},
        payload::NotificationPayload,
        retry::RetryConfig,
        settings::GatewaySettings,
    },
    utils::retry_with_backoff,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The gateway answered and refused the notification; retrying will not help.
    Rejected(DeliveryError),
}

/// HTTP/2 client for the APNs provider API. One request per device token.
#[derive(Debug, Clone)]
pub struct ApnsClient {
    http_client: Client,
    endpoint: String,
    topic: Option<String>,
    retry_config: RetryConfig,
}

impl ApnsClient {
    /// Loads the PKCS#12 client certificate and builds a TLS client around it.
    pub async fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let bundle = tokio::fs::read(&settings.certificate_path)
            .await
            .map_err(|e| {
                GatewayError::Credentials(format!(
                    "cannot read certificate {}: {}",
                    settings.certificate_path.display(),
                    e
                ))
            })?;

        let identity = Identity::from_pkcs12_der(&bundle, &settings.password)
            .map_err(|e| GatewayError::Credentials(format!("cannot unlock certificate: {}", e)))?;

        let http_client = Client::builder()
            .identity(identity)
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(None)
            .build()
            .map_err(|e| GatewayError::Unreachable(format!("cannot create HTTP client: {}", e)))?;

        Ok(Self::from_parts(http_client, settings))
    }

    pub fn from_parts(http_client: Client, settings: &GatewaySettings) -> Self {
        info!(
            endpoint = settings.endpoint(),
            production = settings.production,
            "APNs client initialized"
        );

        Self {
            http_client,
            endpoint: settings.endpoint().to_string(),
            topic: settings.topic.clone(),
            retry_config: settings.retry.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Transient failures are retried with backoff; the error is returned
    /// only once retries are exhausted.
    pub async fn send_notification(
        &self,
        id: NotificationId,
        device_token: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        debug!(
            notification_id = %id,
            device_token,
            "Sending APNs push notification"
        );

        retry_with_backoff(&self.retry_config, move || {
            self.send_notification_once(id, device_token, payload)
        })
        .await
    }

    async fn send_notification_once(
        &self,
        id: NotificationId,
        device_token: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let url = format!("{}/3/device/{}", self.endpoint, device_token);

        let mut request = self
            .http_client
            .post(&url)
            .header("apns-id", id.to_string())
            .header("apns-push-type", "alert")
            .header(CONTENT_TYPE, "application/json")
            .body(payload.as_json().to_string());

        if let Some(topic) = &self.topic {
            request = request.header("apns-topic", topic);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(DeliveryOutcome::Delivered);
        }

        let reason = response
            .json::<GatewayErrorResponse>()
            .await
            .ok()
            .map(|body| body.reason);

        let cause = DeliveryError::from_response(status.as_u16(), reason.as_deref());

        if cause.is_transient() {
            Err(cause)
        } else {
            Ok(DeliveryOutcome::Rejected(cause))
        }
    }
}
