//! `forge-worker` -- image-generation worker.
//!
//! Polls the coordination server for jobs, renders them on a local
//! ComfyUI instance, saves and uploads the results, and destroys its own
//! rented instance when the job stream runs dry. See
//! [`WorkerConfig::from_env`] for the environment variables.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_comfyui::endpoint::BackendEndpoint;
use forge_comfyui::generator::ComfyGenerator;
use forge_comfyui::ready::wait_until_ready;
use forge_worker::cli::Cli;
use forge_worker::config::WorkerConfig;
use forge_worker::orchestrator::{remove_stale_workflow, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_worker=info,forge_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env()?;
    cli.apply(&mut config);
    let config = Arc::new(config);

    tracing::info!(
        worker_id = %config.identity,
        comfyui = %config.comfyui_server,
        coordinator = %config.coordinator_url,
        "Starting forge-worker",
    );

    remove_stale_workflow(&config.workflow_file);

    let endpoint = BackendEndpoint::new(config.comfyui_server.clone());
    let generator = ComfyGenerator::new(
        &endpoint,
        config.comfyui_token.clone(),
        config.completion_timeout,
    );

    if config.skip_ready_check {
        tracing::info!("Skipping ComfyUI readiness check");
    } else {
        wait_until_ready(generator.api(), config.ready_check_interval).await;
    }

    let summary = Orchestrator::new(config, generator).run().await?;
    tracing::info!(?summary, "Run complete");
    Ok(())
}
