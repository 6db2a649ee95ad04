//! StationWatch - ground station health and uptime monitoring.
//!
//! Records station health pings, derives online state and rolling uptime,
//! and raises deduplicated alerts according to per-station rules.

mod config;
mod db;
mod mail;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use mail::{EmailSender, HttpMailer, LogMailer};
use scheduler::{Clock, Scheduler, SystemClock};
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("stationwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StationWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let mailer: Arc<dyn EmailSender> = match &cfg.mail_endpoint {
        Some(endpoint) => {
            tracing::info!("Sending alert emails via {}", endpoint);
            Arc::new(HttpMailer::new(endpoint, &cfg.mail_from, Duration::from_secs(10))?)
        }
        None => {
            tracing::warn!("STATIONWATCH_MAIL_ENDPOINT not set, alert emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Start monitor
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        mailer,
        clock.clone(),
        cfg.monitor.clone(),
    ));
    let monitor = scheduler.start();

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone(), clock);
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    scheduler.stop();
    if let Err(e) = monitor.await {
        tracing::error!("Monitor task ended abnormally: {}", e);
    }

    Ok(())
}
