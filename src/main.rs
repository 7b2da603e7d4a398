mod admin;
mod config;
mod connector;
mod scheduler;
mod store;
mod trigger;

use anyhow::Result;
use config::AutoConnectConfig;
use connector::{BluezConnector, BluezMonitor, ProfileConnector};
use scheduler::{event_channel, AutoConnectService};
use std::sync::Arc;
use store::{FileStore, MemoryStore, PersistenceStore};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AutoConnectConfig::from_env();
    info!("Auto-connect daemon starting");
    info!("  Connect timeout: {:?}", config.connect_timeout);
    info!("  Max retries: {}", config.max_retries);

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    info!("  Adapter: {}", adapter.name());

    let (sink, queue) = event_channel(config.event_capacity);

    let connector: Arc<dyn ProfileConnector> =
        Arc::new(BluezConnector::new(adapter.clone(), sink.clone()));
    let store: Arc<dyn PersistenceStore> = match &config.store_path {
        Some(path) => {
            info!("  Settings: {}", path.display());
            Arc::new(FileStore::new(path, &config.profiles))
        }
        None => {
            warn!("  No settings file, device lists will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let service = AutoConnectService::start(&config, connector, store, queue).await;

    let profiles = config.profiles.iter().map(|p| p.profile).collect();
    let _monitor = BluezMonitor::new(adapter, sink.clone(), profiles).start();
    match trigger::spawn_signal_trigger(sink.clone()) {
        Ok(_) => info!("Send SIGUSR1 to trigger a connection attempt"),
        Err(e) => error!("Failed to install SIGUSR1 trigger: {}", e),
    }

    // Startup counts as a trigger
    sink.trigger().await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        result = admin::run_console(&service, stdin) => {
            if let Err(e) = result {
                error!("Admin console failed: {}", e);
            }
            // Detached from a terminal: keep running until interrupted
            tokio::signal::ctrl_c().await?;
        }
    }
    info!("Shutting down");
    for status in service.snapshot().await {
        info!("{}", status.to_string().trim_end());
    }
    service.release().await?;

    Ok(())
}
