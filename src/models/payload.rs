use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Hard limit the HTTP/2 provider API places on a notification body.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 4096;

pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Custom field '{0}' collides with a reserved payload key")]
    ReservedKey(String),
    #[error("Payload is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("Payload serialization failed: {0}")]
    Serialization(String),
}

#[derive(Serialize)]
struct WireAps<'a> {
    alert: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<&'a str>,
}

#[derive(Serialize)]
struct WirePayload<'a> {
    aps: WireAps<'a>,

    #[serde(flatten)]
    custom: &'a BTreeMap<String, String>,
}

/// A notification body ready for submission. Serialized once when built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    alert: String,
    badge: Option<u32>,
    sound: Option<String>,
    custom_fields: BTreeMap<String, String>,
    size_limit: usize,
    json: String,
}

impl NotificationPayload {
    pub fn builder() -> PayloadBuilder {
        PayloadBuilder::new()
    }

    pub fn alert(&self) -> &str {
        &self.alert
    }

    pub fn badge(&self) -> Option<u32> {
        self.badge
    }

    pub fn sound(&self) -> Option<&str> {
        self.sound.as_deref()
    }

    pub fn custom_field(&self, key: &str) -> Option<&str> {
        self.custom_fields.get(key).map(String::as_str)
    }

    pub fn custom_fields(&self) -> &BTreeMap<String, String> {
        &self.custom_fields
    }

    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    pub fn as_json(&self) -> &str {
        &self.json
    }

    pub fn len(&self) -> usize {
        self.json.len()
    }

    pub fn is_empty(&self) -> bool {
        self.json.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    alert: String,
    badge: Option<u32>,
    sound: Option<String>,
    custom_fields: BTreeMap<String, String>,
    size_limit: usize,
    shrink_marker: Option<String>,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self {
            alert: String::new(),
            badge: None,
            sound: None,
            custom_fields: BTreeMap::new(),
            size_limit: DEFAULT_PAYLOAD_LIMIT,
            shrink_marker: None,
        }
    }

    pub fn alert_body(mut self, alert: impl Into<String>) -> Self {
        self.alert = alert.into();
        self
    }

    pub fn badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }

    pub fn size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Clip the alert text, ending it with `marker`, when the payload would
    /// otherwise exceed the size limit.
    pub fn shrink_body(mut self, marker: impl Into<String>) -> Self {
        self.shrink_marker = Some(marker.into());
        self
    }

    pub fn build(self) -> Result<NotificationPayload, PayloadError> {
        if self.custom_fields.contains_key("aps") {
            return Err(PayloadError::ReservedKey("aps".to_string()));
        }

        let mut alert = self.alert.clone();
        let mut json = self.encode(&alert)?;

        if json.len() > self.size_limit {
            let Some(marker) = self.shrink_marker.as_deref() else {
                return Err(PayloadError::TooLarge {
                    size: json.len(),
                    limit: self.size_limit,
                });
            };
            (alert, json) = self.shrink(marker, json.len())?;
        }

        Ok(NotificationPayload {
            alert,
            badge: self.badge,
            sound: self.sound,
            custom_fields: self.custom_fields,
            size_limit: self.size_limit,
            json,
        })
    }

    fn encode(&self, alert: &str) -> Result<String, PayloadError> {
        let wire = WirePayload {
            aps: WireAps {
                alert,
                badge: self.badge,
                sound: self.sound.as_deref(),
            },
            custom: &self.custom_fields,
        };

        serde_json::to_string(&wire).map_err(|e| PayloadError::Serialization(e.to_string()))
    }

    // Longest char-aligned prefix of the alert that still fits once the
    // marker is appended. Encoded length grows monotonically with the prefix.
    fn shrink(&self, marker: &str, full_size: usize) -> Result<(String, String), PayloadError> {
        let boundaries: Vec<usize> = self.alert.char_indices().map(|(i, _)| i).collect();

        let mut low = 0;
        let mut high = boundaries.len();
        let mut best = None;

        while low < high {
            let mid = (low + high) / 2;
            let candidate = format!("{}{}", &self.alert[..boundaries[mid]], marker);
            let encoded = self.encode(&candidate)?;

            if encoded.len() <= self.size_limit {
                best = Some((candidate, encoded));
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        best.ok_or(PayloadError::TooLarge {
            size: full_size,
            limit: self.size_limit,
        })
    }
}
