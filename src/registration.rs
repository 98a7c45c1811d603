use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    clients::token_store::TokenStore,
    models::{packet::Jid, token::DeviceToken},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RegistrationAction {
    Register { token: String },
    Unregister,
}

/// A client asking to (un)register the device token of the session it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub from: Jid,

    #[serde(flatten)]
    pub action: RegistrationAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationResponse {
    Registered(DeviceToken),
    Unregistered { removed: usize },
    BadRequest(String),
    InternalError,
}

#[derive(Clone)]
pub struct TokenRegistrar {
    token_store: Arc<dyn TokenStore>,
}

impl TokenRegistrar {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self { token_store }
    }

    pub async fn handle(&self, request: RegistrationRequest) -> RegistrationResponse {
        if request.from.node().is_none() {
            return RegistrationResponse::BadRequest("Sender must be a user".to_string());
        }

        let owner = request.from.to_bare();

        match request.action {
            RegistrationAction::Register { token } => {
                let token = match DeviceToken::parse(&token) {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(jid = %owner, error = %e, "Rejected device token registration");
                        return RegistrationResponse::BadRequest(e.to_string());
                    }
                };

                match self.token_store.set_device_token(&owner, &token).await {
                    Ok(()) => {
                        info!(jid = %owner, device_token = %token, "Device token registered");
                        RegistrationResponse::Registered(token)
                    }
                    Err(e) => {
                        error!(jid = %owner, error = %e, "Failed to store device token");
                        RegistrationResponse::InternalError
                    }
                }
            }
            RegistrationAction::Unregister => {
                match self.token_store.delete_device_tokens_for(&owner).await {
                    Ok(removed) => {
                        info!(jid = %owner, removed, "Device tokens unregistered");
                        RegistrationResponse::Unregistered { removed }
                    }
                    Err(e) => {
                        error!(jid = %owner, error = %e, "Failed to remove device tokens");
                        RegistrationResponse::InternalError
                    }
                }
            }
        }
    }
}
