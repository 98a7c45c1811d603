use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        directory::IdentityResolver,
        gateway::{FeedbackReceiver, GatewayHandle},
        token_store::TokenStore,
    },
    config::Config,
    models::{
        feedback::{GatewayEvent, NotificationId},
        packet::{ChatMessage, InterceptContext, MessageType, Packet},
        payload::{PayloadBuilder, TRUNCATION_MARKER},
        token::DeviceToken,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversation {
    Direct,
    Group,
}

impl Conversation {
    pub fn of(kind: MessageType) -> Option<Self> {
        match kind {
            MessageType::Chat => Some(Conversation::Direct),
            MessageType::GroupChat => Some(Conversation::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    NoRecipients,
    GatewayUnavailable,
    Submitted(Vec<NotificationId>),
}

/// Picks out packets that may produce a push: unprocessed inbound chat or
/// group chat messages that carry a body.
pub fn classify(packet: &Packet, context: InterceptContext) -> Option<(Conversation, &ChatMessage)> {
    if context.processed || !context.incoming {
        return None;
    }

    let Packet::Message(message) = packet else {
        return None;
    };

    let conversation = Conversation::of(message.kind)?;
    if message.body.is_none() {
        return None;
    }

    Some((conversation, message))
}

fn alert_text(prefix: &str, body: &str) -> String {
    if body.is_empty() {
        prefix.to_string()
    } else {
        format!("{}: {}", prefix, body)
    }
}

pub struct Dispatcher {
    token_store: Arc<dyn TokenStore>,
    resolver: IdentityResolver,
    gateway: Arc<GatewayHandle>,
}

impl Dispatcher {
    pub fn new(
        token_store: Arc<dyn TokenStore>,
        resolver: IdentityResolver,
        gateway: Arc<GatewayHandle>,
    ) -> Self {
        Self {
            token_store,
            resolver,
            gateway,
        }
    }

    pub async fn dispatch(
        &self,
        config: &Config,
        message: &ChatMessage,
    ) -> Result<DispatchOutcome, Error> {
        let Some(conversation) = Conversation::of(message.kind) else {
            return Ok(DispatchOutcome::Ignored);
        };

        let Some(body) = message.body.as_deref() else {
            return Ok(DispatchOutcome::Ignored);
        };

        let policy = config.payload_policy();
        let body = policy.message_text(body);
        let display_name = self.resolver.display_name(&message.from);

        let builder = PayloadBuilder::new()
            .badge(policy.badge)
            .sound(policy.sound.as_str())
            .size_limit(policy.size_limit);

        let (builder, tokens) = match conversation {
            Conversation::Direct => {
                let builder = builder
                    .custom_field("jid", message.from.bare())
                    // Deprecated, kept for clients that still read it.
                    .custom_field("username", message.from.node().unwrap_or_default())
                    .alert_body(alert_text(&display_name, body));

                let tokens = self.token_store.device_tokens(&message.to.to_bare()).await?;
                (builder, tokens)
            }
            Conversation::Group => self.group_recipients(builder, message, &display_name, body).await?,
        };

        if tokens.is_empty() {
            debug!(from = %message.from, to = %message.to, "No device tokens for recipient");
            return Ok(DispatchOutcome::NoRecipients);
        }

        let Some(connection) = self.gateway.connection().await else {
            return Ok(DispatchOutcome::GatewayUnavailable);
        };

        let payload = builder.shrink_body(TRUNCATION_MARKER).build()?;

        let ids = connection
            .push(&tokens, &payload)
            .map_err(|e| anyhow!("Push submission failed: {}", e))?;

        debug!(
            from = %message.from,
            to = %message.to,
            recipients = tokens.len(),
            payload_bytes = payload.len(),
            "Push notification submitted"
        );

        Ok(DispatchOutcome::Submitted(ids))
    }

    async fn group_recipients(
        &self,
        builder: PayloadBuilder,
        message: &ChatMessage,
        display_name: &str,
        body: &str,
    ) -> Result<(PayloadBuilder, Vec<DeviceToken>), Error> {
        let builder = builder.custom_field("jid", message.to.bare());

        match self.resolver.find_room(&message.to) {
            Some(room) => {
                let tokens = self.token_store.device_tokens_for_room(room.id).await?;
                let prefix = format!("{}@{}", display_name, room.natural_name);
                let builder = builder
                    // Deprecated, kept for clients that still read it.
                    .custom_field("roomname", room.name.as_str())
                    .alert_body(alert_text(&prefix, body));
                Ok((builder, tokens))
            }
            None => {
                warn!(room = %message.to, "Room not found, no group recipients");
                let label = message.to.node().unwrap_or(message.to.domain());
                let prefix = format!("{}@{}", display_name, label);
                Ok((builder.alert_body(alert_text(&prefix, body)), Vec::new()))
            }
        }
    }
}

/// Drains gateway feedback and prunes tokens the gateway reports as invalid.
#[derive(Clone)]
pub struct FeedbackHandler {
    token_store: Arc<dyn TokenStore>,
}

impl FeedbackHandler {
    pub fn new(token_store: Arc<dyn TokenStore>) -> Self {
        Self { token_store }
    }

    pub async fn run(self, mut events: FeedbackReceiver) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Feedback channel closed");
    }

    pub async fn handle(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::DeliverySucceeded { id, token, resent } => {
                info!(notification_id = %id, device_token = %token, resent, "Notification delivered");
            }
            GatewayEvent::DeliveryFailed { id, token, cause } => {
                error!(
                    notification_id = %id,
                    device_token = %token,
                    cause = %cause,
                    "Notification delivery failed"
                );

                if cause.is_invalid_token() {
                    self.prune(&token).await;
                }
            }
            GatewayEvent::ConnectionClosed { cause, last_id } => {
                let last_id = last_id.map(|id| id.to_string());
                error!(cause = %cause, last_notification_id = ?last_id, "Gateway connection closed");
            }
            GatewayEvent::CacheLengthExceeded { new_length } => {
                info!(new_length, "Gateway resend buffer grew");
            }
            GatewayEvent::NotificationsResent { count } => {
                info!(count, "Notifications resent");
            }
        }
    }

    async fn prune(&self, token: &DeviceToken) {
        match self.token_store.delete_device_token(token).await {
            Ok(true) => info!(device_token = %token, "Removed invalid device token"),
            Ok(false) => debug!(device_token = %token, "Invalid device token already removed"),
            Err(e) => warn!(device_token = %token, error = %e, "Failed to remove invalid device token"),
        }
    }
}
