use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        directory::{IdentityResolver, RoomRegistry, UserDirectory},
        gateway::{FeedbackReceiver, GatewayFactory, GatewayHandle, GatewayState},
        health::HealthChecker,
        token_store::TokenStore,
    },
    config::Config,
    dispatch::{Dispatcher, FeedbackHandler, classify},
    interceptor::{InterceptorRegistry, PacketInterceptor, PacketRejected},
    models::packet::{ChatMessage, InterceptContext, Packet},
    registration::TokenRegistrar,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct PluginDependencies {
    pub token_store: Arc<dyn TokenStore>,
    pub users: Arc<dyn UserDirectory>,
    pub rooms: Arc<dyn RoomRegistry>,
    pub gateway_factory: Arc<dyn GatewayFactory>,
}

/// Interceptor half of the plugin. Classifies inline and hands candidates to
/// the dispatch worker; never rejects a packet.
struct DispatchInterceptor {
    queue: Mutex<Option<mpsc::UnboundedSender<ChatMessage>>>,
}

impl PacketInterceptor for DispatchInterceptor {
    fn intercept_packet(
        &self,
        packet: &Packet,
        context: InterceptContext,
    ) -> Result<(), PacketRejected> {
        let Some((conversation, message)) = classify(packet, context) else {
            return Ok(());
        };

        match self.queue.lock().as_ref() {
            Some(queue) => {
                if queue.send(message.clone()).is_err() {
                    warn!(from = %message.from, "Dispatch worker gone, dropping push");
                }
            }
            None => debug!(?conversation, "Plugin not running, ignoring message"),
        }

        Ok(())
    }
}

/// Lifecycle owner: wires the interceptor, dispatch worker, feedback worker
/// and gateway connection together between `start` and `stop`.
pub struct ApnsPlugin {
    config: Arc<RwLock<Arc<Config>>>,
    token_store: Arc<dyn TokenStore>,
    dispatcher: Arc<Dispatcher>,
    gateway: Arc<GatewayHandle>,
    feedback: Mutex<Option<FeedbackReceiver>>,
    interceptor: Arc<DispatchInterceptor>,
    registry: Mutex<Option<Arc<dyn InterceptorRegistry>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reloading: AsyncMutex<()>,
    stopped: AtomicBool,
}

impl ApnsPlugin {
    pub fn new(config: Config, dependencies: PluginDependencies) -> Self {
        let (feedback_sender, feedback_receiver) = mpsc::unbounded_channel();

        let gateway = Arc::new(GatewayHandle::new(
            dependencies.gateway_factory,
            config.gateway_settings(),
            feedback_sender,
        ));

        let resolver = IdentityResolver::new(dependencies.users, dependencies.rooms);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&dependencies.token_store),
            resolver,
            Arc::clone(&gateway),
        ));

        Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
            token_store: dependencies.token_store,
            dispatcher,
            gateway,
            feedback: Mutex::new(Some(feedback_receiver)),
            interceptor: Arc::new(DispatchInterceptor {
                queue: Mutex::new(None),
            }),
            registry: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            reloading: AsyncMutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawns the workers and subscribes to the host's packet pipeline.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, registry: Arc<dyn InterceptorRegistry>) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Plugin already stopped, not starting");
            return;
        }

        let Some(feedback) = self.feedback.lock().take() else {
            warn!("Plugin already started");
            return;
        };

        let (queue, receiver) = mpsc::unbounded_channel();
        *self.interceptor.queue.lock() = Some(queue);

        let dispatch_worker = tokio::spawn(run_dispatch_worker(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.config),
            receiver,
        ));
        let feedback_worker =
            tokio::spawn(FeedbackHandler::new(Arc::clone(&self.token_store)).run(feedback));
        self.workers.lock().extend([dispatch_worker, feedback_worker]);

        registry.add_interceptor(self.interceptor.clone());
        *self.registry.lock() = Some(registry);

        info!("Push notification plugin started");
    }

    /// Unsubscribes, drains queued dispatches, then closes the gateway. Runs once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = self.registry.lock().take();
        if let Some(registry) = registry {
            let interceptor: Arc<dyn PacketInterceptor> = self.interceptor.clone();
            registry.remove_interceptor(&interceptor);
        }

        self.interceptor.queue.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let mut workers = workers.into_iter();

        // The dispatch worker goes first so its last submissions reach the gateway.
        if let Some(dispatch_worker) = workers.next() {
            join_worker(dispatch_worker, "dispatch").await;
        }

        self.gateway.stop().await;

        for worker in workers {
            join_worker(worker, "feedback").await;
        }

        info!("Push notification plugin stopped");
    }

    /// Swap in a new configuration. A change of gateway settings closes the
    /// current connection so the next push reconnects with the new ones.
    pub async fn reload_config(&self, config: Config) {
        let _reloading = self.reloading.lock().await;

        let settings = config.gateway_settings();
        *self.config.write() = Arc::new(config);

        if self.gateway.reconfigure(settings).await {
            info!("Gateway settings changed, connection reset");
        }
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn interceptor(&self) -> Arc<dyn PacketInterceptor> {
        self.interceptor.clone()
    }

    pub fn registrar(&self) -> TokenRegistrar {
        TokenRegistrar::new(Arc::clone(&self.token_store))
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(Arc::clone(&self.gateway), Arc::clone(&self.token_store))
    }

    pub async fn gateway_state(&self) -> GatewayState {
        self.gateway.state().await
    }
}

async fn run_dispatch_worker(
    dispatcher: Arc<Dispatcher>,
    config: Arc<RwLock<Arc<Config>>>,
    mut queue: mpsc::UnboundedReceiver<ChatMessage>,
) {
    while let Some(message) = queue.recv().await {
        let snapshot = Arc::clone(&config.read());

        let result = AssertUnwindSafe(dispatcher.dispatch(&snapshot, &message))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => debug!(from = %message.from, ?outcome, "Message dispatched"),
            Ok(Err(e)) => error!(from = %message.from, to = %message.to, error = %e, "Push dispatch failed"),
            Err(_) => error!(from = %message.from, to = %message.to, "Push dispatch panicked"),
        }
    }

    debug!("Dispatch worker stopped");
}

async fn join_worker(worker: JoinHandle<()>, name: &str) {
    let abort = worker.abort_handle();

    match timeout(SHUTDOWN_GRACE, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(worker = name, error = %e, "Worker failed"),
        Err(_) => {
            warn!(worker = name, "Worker did not finish in time, aborting");
            abort.abort();
        }
    }
}
