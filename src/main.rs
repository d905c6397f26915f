//! Puller daemon entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use tokio::signal;

mod cleanup;
mod config;
mod detector;
mod engine;
mod error;
mod logging;
mod notifier;
mod reconciler;
mod reference;
mod runtime;
mod scanner;
mod scheduler;
mod types;

use config::{Cli, Config};
use engine::Engine;
use notifier::WebhookNotifier;
use runtime::{ContainerRuntime, DockerRuntime};
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let cfg = Arc::new(Config::load(&cli)?);
    logging::init(cfg.verbosity);

    info!("Starting puller service with interval: {}s", cfg.interval);
    info!("Cleanup enabled: {}", cfg.cleanup);
    info!(
        "Label filtering enabled: {} ({})",
        cfg.label_enable, cfg.enable_label
    );
    info!("Verbosity: {:?}", cfg.verbosity);
    if let Some(url) = &cfg.notification_url {
        info!("Notifications enabled: {}", url);
    }
    if let Some(tag) = &cfg.registry_tag {
        info!("Additional registry tag to check: {}", tag);
    }

    // Container Runtime (Docker); unreachable at startup is fatal
    let runtime = DockerRuntime::connect().context("Error creating Docker client")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not reachable")?;

    let notifier = WebhookNotifier::new(cfg.notification_url.clone())
        .context("Error creating notification client")?;
    let engine = Engine::new(runtime, notifier, Arc::clone(&cfg));
    engine.announce_startup().await;

    let scheduler = Scheduler::new(engine, cfg.interval());
    scheduler
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => {
                    // Without a signal handler the loop runs until killed.
                    error!("Unable to listen for shutdown signal: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;

    info!("Shutdown complete.");
    Ok(())
}
