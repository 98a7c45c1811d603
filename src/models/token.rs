use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MIN_TOKEN_LENGTH: usize = 8;
const MAX_TOKEN_LENGTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Device token cannot be empty")]
    Empty,
    #[error("Device token too short (minimum 8 characters)")]
    TooShort,
    #[error("Device token too long (maximum 200 characters)")]
    TooLong,
    #[error("Device token is not hex-encoded")]
    NotHex,
}

/// Hex-encoded push endpoint of a single device.
///
/// Values read back from a token store are taken as-is; only tokens a client
/// registers go through [`DeviceToken::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Validates and normalizes a client-supplied token. Accepts the
    /// `<abcd ef01>` form some SDKs print.
    pub fn parse(value: &str) -> Result<Self, TokenError> {
        let normalized: String = value
            .chars()
            .filter(|c| !matches!(c, '<' | '>' | ' '))
            .collect::<String>()
            .to_lowercase();

        if normalized.is_empty() {
            return Err(TokenError::Empty);
        }

        if normalized.len() < MIN_TOKEN_LENGTH {
            return Err(TokenError::TooShort);
        }

        if normalized.len() > MAX_TOKEN_LENGTH {
            return Err(TokenError::TooLong);
        }

        hex::decode(&normalized).map_err(|_| TokenError::NotHex)?;

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}
