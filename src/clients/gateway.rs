use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::apns::{ApnsClient, DeliveryOutcome},
    models::{
        feedback::{GatewayEvent, NotificationId},
        payload::NotificationPayload,
        settings::GatewaySettings,
        token::DeviceToken,
    },
};

pub type FeedbackSender = mpsc::UnboundedSender<GatewayEvent>;
pub type FeedbackReceiver = mpsc::UnboundedReceiver<GatewayEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Gateway credentials rejected: {0}")]
    Credentials(String),
    #[error("Gateway unreachable: {0}")]
    Unreachable(String),
    #[error("Gateway connection is closed")]
    Closed,
}

/// A live session to the push provider.
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Queue one notification per token. Must not block on network I/O.
    fn push(
        &self,
        tokens: &[DeviceToken],
        payload: &NotificationPayload,
    ) -> Result<Vec<NotificationId>, GatewayError>;

    async fn stop(&self);
}

#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(
        &self,
        settings: &GatewaySettings,
        feedback: FeedbackSender,
    ) -> Result<Arc<dyn GatewayConnection>, GatewayError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ApnsGatewayFactory;

#[async_trait]
impl GatewayFactory for ApnsGatewayFactory {
    async fn connect(
        &self,
        settings: &GatewaySettings,
        feedback: FeedbackSender,
    ) -> Result<Arc<dyn GatewayConnection>, GatewayError> {
        let client = ApnsClient::new(settings).await?;
        Ok(Arc::new(ApnsConnection::spawn(
            client,
            settings.resend_buffer,
            feedback,
        )))
    }
}

struct QueuedNotification {
    id: NotificationId,
    token: DeviceToken,
    payload: Arc<NotificationPayload>,
}

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway connection backed by a single worker task draining an unbounded queue.
pub struct ApnsConnection {
    queue: Mutex<Option<mpsc::UnboundedSender<QueuedNotification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl ApnsConnection {
    pub fn spawn(client: ApnsClient, resend_buffer: usize, feedback: FeedbackSender) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();

        let worker = ConnectionWorker {
            client,
            feedback,
            retained: VecDeque::new(),
            cache_length: resend_buffer.max(1),
            last_delivered: None,
        };

        Self {
            queue: Mutex::new(Some(queue)),
            worker: Mutex::new(Some(tokio::spawn(worker.run(receiver)))),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Upper bound on how long `stop` waits for queued notifications to drain.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

#[async_trait]
impl GatewayConnection for ApnsConnection {
    fn push(
        &self,
        tokens: &[DeviceToken],
        payload: &NotificationPayload,
    ) -> Result<Vec<NotificationId>, GatewayError> {
        let queue = self.queue.lock();
        let queue = queue.as_ref().ok_or(GatewayError::Closed)?;
        let payload = Arc::new(payload.clone());

        tokens
            .iter()
            .map(|token| {
                let id = NotificationId::new();
                queue
                    .send(QueuedNotification {
                        id,
                        token: token.clone(),
                        payload: Arc::clone(&payload),
                    })
                    .map(|_| id)
                    .map_err(|_| GatewayError::Closed)
            })
            .collect()
    }

    async fn stop(&self) {
        // Dropping the sender lets the worker drain what is already queued.
        self.queue.lock().take();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let abort = worker.abort_handle();

        match timeout(self.stop_timeout, worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Gateway connection worker failed"),
            Err(_) => {
                warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Gateway connection did not drain in time, dropping queued notifications"
                );
                abort.abort();
            }
        }
    }
}

struct ConnectionWorker {
    client: ApnsClient,
    feedback: FeedbackSender,
    retained: VecDeque<QueuedNotification>,
    cache_length: usize,
    last_delivered: Option<NotificationId>,
}

impl ConnectionWorker {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<QueuedNotification>) {
        debug!(endpoint = self.client.endpoint(), "Gateway connection worker started");

        while let Some(notification) = queue.recv().await {
            if self.deliver(notification, false).await && !self.retained.is_empty() {
                self.resend_retained().await;
            }
        }

        if !self.retained.is_empty() {
            warn!(
                dropped = self.retained.len(),
                "Gateway connection stopped with notifications awaiting resend"
            );
        }

        debug!("Gateway connection worker stopped");
    }

    /// Returns false when the gateway could not be reached.
    async fn deliver(&mut self, notification: QueuedNotification, resent: bool) -> bool {
        let outcome = self
            .client
            .send_notification(
                notification.id,
                notification.token.as_str(),
                &notification.payload,
            )
            .await;

        match outcome {
            Ok(DeliveryOutcome::Delivered) => {
                self.last_delivered = Some(notification.id);
                self.emit(GatewayEvent::DeliverySucceeded {
                    id: notification.id,
                    token: notification.token,
                    resent,
                });
                true
            }
            Ok(DeliveryOutcome::Rejected(cause)) => {
                self.emit(GatewayEvent::DeliveryFailed {
                    id: notification.id,
                    token: notification.token,
                    cause,
                });
                true
            }
            Err(cause) => {
                self.emit(GatewayEvent::ConnectionClosed {
                    cause,
                    last_id: self.last_delivered,
                });
                self.retain(notification);
                false
            }
        }
    }

    fn retain(&mut self, notification: QueuedNotification) {
        self.retained.push_back(notification);

        if self.retained.len() > self.cache_length {
            self.cache_length *= 2;
            self.emit(GatewayEvent::CacheLengthExceeded {
                new_length: self.cache_length,
            });
        }
    }

    async fn resend_retained(&mut self) {
        let batch: Vec<QueuedNotification> = self.retained.drain(..).collect();
        let count = batch.len();
        let mut pending = batch.into_iter();

        while let Some(notification) = pending.next() {
            if !self.deliver(notification, true).await {
                // Unreachable again: keep the rest for the next successful delivery.
                self.retained.extend(pending);
                return;
            }
        }

        self.emit(GatewayEvent::NotificationsResent { count });
    }

    fn emit(&self, event: GatewayEvent) {
        if self.feedback.send(event).is_err() {
            debug!("Feedback receiver dropped, discarding gateway event");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Uninitialized,
    Active,
    Failed,
    Stopped,
}

impl GatewayState {
    pub fn as_str(&self) -> &str {
        match self {
            GatewayState::Uninitialized => "uninitialized",
            GatewayState::Active => "active",
            GatewayState::Failed => "failed",
            GatewayState::Stopped => "stopped",
        }
    }
}

enum Slot {
    Uninitialized,
    Active(Arc<dyn GatewayConnection>),
    Failed,
    Stopped,
}

struct Inner {
    slot: Slot,
    settings: GatewaySettings,
}

/// Lazily constructed, shared gateway connection.
///
/// The first caller builds the connection while holding the lock, so at
/// most one construction is ever in flight. Construction always uses the
/// settings current at that moment, and a failed construction latches until
/// [`GatewayHandle::reset`] or [`GatewayHandle::reconfigure`].
pub struct GatewayHandle {
    factory: Arc<dyn GatewayFactory>,
    feedback: Mutex<Option<FeedbackSender>>,
    inner: AsyncMutex<Inner>,
}

impl GatewayHandle {
    pub fn new(
        factory: Arc<dyn GatewayFactory>,
        settings: GatewaySettings,
        feedback: FeedbackSender,
    ) -> Self {
        Self {
            factory,
            feedback: Mutex::new(Some(feedback)),
            inner: AsyncMutex::new(Inner {
                slot: Slot::Uninitialized,
                settings,
            }),
        }
    }

    pub async fn connection(&self) -> Option<Arc<dyn GatewayConnection>> {
        let mut guard = self.inner.lock().await;
        let Inner { slot, settings } = &mut *guard;

        match slot {
            Slot::Active(connection) => return Some(Arc::clone(connection)),
            Slot::Failed | Slot::Stopped => return None,
            Slot::Uninitialized => {}
        }

        let feedback = self.feedback.lock().clone()?;

        match self.factory.connect(settings, feedback).await {
            Ok(connection) => {
                info!(
                    endpoint = settings.endpoint(),
                    "Gateway connection established"
                );
                *slot = Slot::Active(Arc::clone(&connection));
                Some(connection)
            }
            Err(e) => {
                error!(
                    error = %e,
                    endpoint = settings.endpoint(),
                    "Failed to open gateway connection, push notifications disabled"
                );
                *slot = Slot::Failed;
                None
            }
        }
    }

    pub async fn state(&self) -> GatewayState {
        match &self.inner.lock().await.slot {
            Slot::Uninitialized => GatewayState::Uninitialized,
            Slot::Active(_) => GatewayState::Active,
            Slot::Failed => GatewayState::Failed,
            Slot::Stopped => GatewayState::Stopped,
        }
    }

    pub async fn settings(&self) -> GatewaySettings {
        self.inner.lock().await.settings.clone()
    }

    /// Close any open connection so the next submission builds a fresh one.
    pub async fn reset(&self) {
        let previous = {
            let mut inner = self.inner.lock().await;
            Self::clear(&mut inner.slot)
        };

        if let Some(connection) = previous {
            connection.stop().await;
        }
    }

    /// Swap in new settings. Returns true when they differ from the current
    /// ones, in which case any open connection is closed and the next
    /// submission connects with the new settings.
    pub async fn reconfigure(&self, settings: GatewaySettings) -> bool {
        let previous = {
            let mut inner = self.inner.lock().await;
            if inner.settings == settings {
                return false;
            }
            inner.settings = settings;
            Self::clear(&mut inner.slot)
        };

        if let Some(connection) = previous {
            connection.stop().await;
        }

        true
    }

    /// Stops the connection and releases the feedback sender. Idempotent.
    pub async fn stop(&self) {
        let previous = {
            let mut inner = self.inner.lock().await;
            std::mem::replace(&mut inner.slot, Slot::Stopped)
        };

        if let Slot::Active(connection) = previous {
            connection.stop().await;
            info!("Gateway connection stopped");
        }

        self.feedback.lock().take();
    }

    // Leaves a stopped handle stopped.
    fn clear(slot: &mut Slot) -> Option<Arc<dyn GatewayConnection>> {
        match std::mem::replace(slot, Slot::Uninitialized) {
            Slot::Active(connection) => Some(connection),
            Slot::Stopped => {
                *slot = Slot::Stopped;
                None
            }
            Slot::Uninitialized | Slot::Failed => None,
        }
    }
}
