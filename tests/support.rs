use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use apns_bridge::{
    clients::{
        directory::{IdentityResolver, InMemoryDirectory},
        gateway::{
            FeedbackSender, GatewayConnection, GatewayError, GatewayFactory, GatewayHandle,
        },
        token_store::InMemoryTokenStore,
    },
    config::Config,
    dispatch::Dispatcher,
    models::{
        feedback::{GatewayEvent, NotificationId},
        packet::{ChatMessage, Jid, MessageType},
        payload::NotificationPayload,
        room::Room,
        settings::GatewaySettings,
        token::DeviceToken,
    },
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub fn jid(value: &str) -> Jid {
    Jid::parse(value).expect("valid test JID")
}

pub fn token(value: &str) -> DeviceToken {
    DeviceToken::new(value)
}

pub fn chat(from: &str, to: &str, body: Option<&str>) -> ChatMessage {
    ChatMessage::new(MessageType::Chat, jid(from), jid(to), body)
}

pub fn groupchat(from: &str, room: &str, body: Option<&str>) -> ChatMessage {
    ChatMessage::new(MessageType::GroupChat, jid(from), jid(room), body)
}

pub fn test_config() -> Config {
    Config {
        apns_send_message_body: true,
        ..Config::default()
    }
}

/// Records every submission instead of talking to a gateway.
#[derive(Default)]
pub struct RecordingGateway {
    pub pushes: Mutex<Vec<(Vec<DeviceToken>, NotificationPayload)>>,
    pub stops: AtomicUsize,
}

impl RecordingGateway {
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    pub fn last_push(&self) -> Option<(Vec<DeviceToken>, NotificationPayload)> {
        self.pushes.lock().last().cloned()
    }
}

#[async_trait]
impl GatewayConnection for RecordingGateway {
    fn push(
        &self,
        tokens: &[DeviceToken],
        payload: &NotificationPayload,
    ) -> Result<Vec<NotificationId>, GatewayError> {
        self.pushes.lock().push((tokens.to_vec(), payload.clone()));
        Ok(tokens.iter().map(|_| NotificationId::new()).collect())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same recording gateway and keeps a weak handle on the
/// feedback channel so tests can play the gateway's side of it without
/// keeping the channel open.
#[derive(Default)]
pub struct RecordingFactory {
    pub gateway: Arc<RecordingGateway>,
    pub connects: AtomicUsize,
    pub built_with: Mutex<Vec<GatewaySettings>>,
    feedback: Mutex<Option<mpsc::WeakUnboundedSender<GatewayEvent>>>,
}

impl RecordingFactory {
    pub fn feedback(&self) -> Option<FeedbackSender> {
        self.feedback.lock().as_ref().and_then(|weak| weak.upgrade())
    }
}

#[async_trait]
impl GatewayFactory for RecordingFactory {
    async fn connect(
        &self,
        settings: &GatewaySettings,
        feedback: FeedbackSender,
    ) -> Result<Arc<dyn GatewayConnection>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.built_with.lock().push(settings.clone());
        *self.feedback.lock() = Some(feedback.downgrade());
        Ok(self.gateway.clone())
    }
}

/// Fails every construction, like a certificate with the wrong password.
#[derive(Default)]
pub struct FailingFactory {
    pub connects: AtomicUsize,
}

#[async_trait]
impl GatewayFactory for FailingFactory {
    async fn connect(
        &self,
        _settings: &GatewaySettings,
        _feedback: FeedbackSender,
    ) -> Result<Arc<dyn GatewayConnection>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::Credentials("mac verify failure".to_string()))
    }
}

/// Directory with alice (display "Alice"), bob, and the "lobby" room on the
/// conference service, plus a token store where bob owns "abcd" and the lobby
/// members own t1 and t2.
pub struct Fixture {
    pub directory: Arc<InMemoryDirectory>,
    pub store: Arc<InMemoryTokenStore>,
}

pub const LOBBY_ID: i64 = 7;

impl Fixture {
    pub async fn new() -> Self {
        use apns_bridge::clients::token_store::TokenStore;

        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user(&jid("alice@domain"), Some("Alice"));
        directory.add_user(&jid("bob@domain"), Some("Bob"));
        directory.add_room("conference", Room::new(LOBBY_ID, "lobby", "The Lobby"));

        let store = Arc::new(InMemoryTokenStore::new());
        store
            .set_device_token(&jid("bob@domain"), &token("abcd"))
            .await
            .expect("store write");
        store
            .set_device_token(&jid("carol@domain"), &token("t1"))
            .await
            .expect("store write");
        store
            .set_device_token(&jid("dave@domain"), &token("t2"))
            .await
            .expect("store write");
        store.add_room_member(LOBBY_ID, &jid("carol@domain"));
        store.add_room_member(LOBBY_ID, &jid("dave@domain"));

        Self { directory, store }
    }

    pub fn dispatcher(&self, factory: Arc<dyn GatewayFactory>) -> (Dispatcher, Arc<GatewayHandle>) {
        let (feedback, _receiver) = mpsc::unbounded_channel();
        let gateway = Arc::new(GatewayHandle::new(
            factory,
            test_config().gateway_settings(),
            feedback,
        ));
        let resolver = IdentityResolver::new(self.directory.clone(), self.directory.clone());

        (
            Dispatcher::new(self.store.clone(), resolver, gateway.clone()),
            gateway,
        )
    }
}
