use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use crate::models::packet::{InterceptContext, Packet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Packet rejected: {0}")]
pub struct PacketRejected(pub String);

/// Invoked inline on the routing pipeline for every packet. Returning an error
/// aborts delivery of that packet.
pub trait PacketInterceptor: Send + Sync {
    fn intercept_packet(&self, packet: &Packet, context: InterceptContext)
    -> Result<(), PacketRejected>;
}

pub trait InterceptorRegistry: Send + Sync {
    fn add_interceptor(&self, interceptor: Arc<dyn PacketInterceptor>);

    fn remove_interceptor(&self, interceptor: &Arc<dyn PacketInterceptor>);
}

/// Ordered interceptor list for hosts that route packets in process.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn PacketInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    /// Runs every interceptor; delivery proceeds only if none rejects.
    pub fn deliver(&self, packet: &Packet, context: InterceptContext) -> Result<(), PacketRejected> {
        let interceptors = self.interceptors.read().clone();

        for interceptor in interceptors {
            if let Err(rejection) = interceptor.intercept_packet(packet, context) {
                warn!(error = %rejection, "Packet rejected by interceptor");
                return Err(rejection);
            }
        }

        Ok(())
    }
}

impl InterceptorRegistry for InterceptorChain {
    fn add_interceptor(&self, interceptor: Arc<dyn PacketInterceptor>) {
        self.interceptors.write().push(interceptor);
    }

    fn remove_interceptor(&self, interceptor: &Arc<dyn PacketInterceptor>) {
        self.interceptors
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, interceptor));
    }
}
