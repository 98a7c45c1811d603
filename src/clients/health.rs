use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::{
    clients::{
        gateway::{GatewayHandle, GatewayState},
        token_store::TokenStore,
    },
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

#[derive(Clone)]
pub struct HealthChecker {
    gateway: Arc<GatewayHandle>,
    token_store: Arc<dyn TokenStore>,
}

impl HealthChecker {
    pub fn new(gateway: Arc<GatewayHandle>, token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            gateway,
            token_store,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("token_store".to_string(), self.check_token_store().await);
        checks.insert("gateway".to_string(), self.check_gateway().await);

        let overall_status = Self::determine_overall_status(&checks);

        HealthCheckResponse {
            status: overall_status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            checks,
        }
    }

    async fn check_token_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.token_store.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Token store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Token store health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    async fn check_gateway(&self) -> ServiceHealth {
        let state = self.gateway.state().await;

        let health = match state {
            GatewayState::Active => ServiceHealth::healthy(0),
            // Opened lazily on the first push.
            GatewayState::Uninitialized => {
                ServiceHealth::degraded("No notification submitted yet".to_string())
            }
            GatewayState::Failed => {
                ServiceHealth::unhealthy("Gateway connection could not be opened".to_string())
            }
            GatewayState::Stopped => ServiceHealth::unhealthy("Gateway stopped".to_string()),
        };

        health.with_state(state.as_str())
    }

    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let has_unhealthy = checks
            .values()
            .any(|health| health.status == HealthStatus::Unhealthy);

        let has_degraded = checks
            .values()
            .any(|health| health.status == HealthStatus::Degraded);

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
