use anyhow::Result;
use std::sync::Arc;
use tracing::{info, Level};

use dispatch_core::api::ApiServer;
use dispatch_core::authz::SqliteAuthZ;
use dispatch_core::config::Config;
use dispatch_core::dispatch::{Dispatcher, TimeoutPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting dispatch-core coordinator");

    let config = Config::load()?;
    let authz = Arc::new(SqliteAuthZ::open(&config.dispatch.db_path)?);

    let timeouts = TimeoutPolicy {
        default_submit: config.dispatch.default_submit_timeout(),
        min_submit: config.dispatch.min_submit_timeout(),
        max_submit: config.dispatch.max_submit_timeout(),
        poll: config.dispatch.poll_timeout(),
    };
    let dispatcher = Arc::new(Dispatcher::new(
        authz.clone(),
        timeouts,
        config.dispatch.queue_capacity,
    ));

    let api_server = ApiServer::new(config, dispatcher, authz);
    api_server.run().await?;

    Ok(())
}
