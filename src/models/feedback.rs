use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::token::DeviceToken;

/// Identifier the gateway echoes back for a single (token, payload) delivery.
/// Sent as the `apns-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for NotificationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Error body returned by the gateway alongside a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayErrorResponse {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    BadDeviceToken,
    Unregistered,
    DeviceTokenNotForTopic,
    PayloadTooLarge,
    BadTopic,
    MissingTopic,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
    Transport(String),
    Other { status: u16, reason: String },
}

impl DeliveryError {
    pub fn from_response(status: u16, reason: Option<&str>) -> Self {
        match reason {
            Some("BadDeviceToken") => Self::BadDeviceToken,
            Some("Unregistered") => Self::Unregistered,
            Some("DeviceTokenNotForTopic") => Self::DeviceTokenNotForTopic,
            Some("PayloadTooLarge") => Self::PayloadTooLarge,
            Some("BadTopic") | Some("TopicDisallowed") => Self::BadTopic,
            Some("MissingTopic") => Self::MissingTopic,
            Some("TooManyRequests") => Self::TooManyRequests,
            Some("InternalServerError") => Self::InternalServerError,
            Some("ServiceUnavailable") => Self::ServiceUnavailable,
            Some("Shutdown") => Self::Shutdown,
            _ => match status {
                410 => Self::Unregistered,
                413 => Self::PayloadTooLarge,
                429 => Self::TooManyRequests,
                500 => Self::InternalServerError,
                503 => Self::ServiceUnavailable,
                _ => Self::Other {
                    status,
                    reason: reason.unwrap_or_default().to_string(),
                },
            },
        }
    }

    /// The device uninstalled the app or the token was revoked.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::BadDeviceToken | Self::Unregistered)
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::TooManyRequests
            | Self::InternalServerError
            | Self::ServiceUnavailable
            | Self::Shutdown
            | Self::Transport(_) => true,
            Self::Other { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::BadDeviceToken => write!(f, "bad device token"),
            Self::Unregistered => write!(f, "device token unregistered"),
            Self::DeviceTokenNotForTopic => write!(f, "device token not for topic"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::BadTopic => write!(f, "bad topic"),
            Self::MissingTopic => write!(f, "missing topic"),
            Self::TooManyRequests => write!(f, "too many requests"),
            Self::InternalServerError => write!(f, "gateway internal error"),
            Self::ServiceUnavailable => write!(f, "gateway unavailable"),
            Self::Shutdown => write!(f, "gateway shutting down"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Other { status, reason } => write!(f, "status {}: {}", status, reason),
        }
    }
}

/// Asynchronous delivery feedback written by a gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    DeliverySucceeded {
        id: NotificationId,
        token: DeviceToken,
        resent: bool,
    },
    DeliveryFailed {
        id: NotificationId,
        token: DeviceToken,
        cause: DeliveryError,
    },
    ConnectionClosed {
        cause: DeliveryError,
        last_id: Option<NotificationId>,
    },
    /// The retained-for-resend buffer outgrew its capacity.
    CacheLengthExceeded { new_length: usize },
    NotificationsResent { count: usize },
}
