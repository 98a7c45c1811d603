use std::sync::Arc;

use anyhow::{Error, Result};
use apns_bridge::{
    api::run_api_server,
    clients::{
        database::PostgresTokenStore, directory::InMemoryDirectory, gateway::ApnsGatewayFactory,
    },
    config::Config,
    interceptor::InterceptorChain,
    plugin::{ApnsPlugin, PluginDependencies},
    utils::init_tracing,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    let token_store = Arc::new(PostgresTokenStore::connect(&config.database_url).await?);
    token_store.ensure_schema().await?;

    let directory = Arc::new(InMemoryDirectory::new());
    let interceptors = Arc::new(InterceptorChain::new());

    let plugin = ApnsPlugin::new(
        config.clone(),
        PluginDependencies {
            token_store,
            users: directory.clone(),
            rooms: directory,
            gateway_factory: Arc::new(ApnsGatewayFactory),
        },
    );
    plugin.start(interceptors);

    info!(
        production = config.apns_production,
        port = config.server_port,
        "Push notification bridge is ready"
    );

    let result = tokio::select! {
        result = run_api_server(config.server_port, plugin.health_checker()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    plugin.stop().await;

    result
}
