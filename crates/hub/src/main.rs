//! `forge-hub-upload` -- push a file or a zipped folder to the hub.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use forge_hub::cli::Cli;
use forge_hub::client::HubClient;
use forge_hub::upload::{push, PreparedUpload};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let prepared = match PreparedUpload::prepare(&cli.request()) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!(error = %e, "Nothing to upload");
            return ExitCode::FAILURE;
        }
    };

    let client = HubClient::new(cli.endpoint.clone(), cli.token.clone());
    let result = push(&client, &cli.repo(), &prepared).await;
    prepared.cleanup(result.is_ok());

    match result {
        Ok(url) => {
            println!("{url}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(repo = %cli.repo_id, error = %e, "Upload failed");
            ExitCode::FAILURE
        }
    }
}
