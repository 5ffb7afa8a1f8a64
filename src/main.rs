mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

use pokt_monitor::api::{self, AppState};
use pokt_monitor::config::Config;
use pokt_monitor::service::MonitoringService;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let service = Arc::new(MonitoringService::from_config(&config).await?);

    match cli.command {
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            api::run_http_server(&bind, AppState { service }).await?;
        }
        Commands::Height => {
            print_json(&serde_json::json!({ "height": service.height().await? }))?;
        }
        Commands::Node { address } => {
            print_json(&service.node(&address).await?)?;
        }
        Commands::Tx { hash } => {
            print_json(&service.transaction(&hash).await?)?;
        }
        Commands::AccountTxs {
            address,
            page,
            per_page,
            sort,
        } => {
            let txs = service
                .account_transactions(&address, page, per_page, sort.into())
                .await?;
            print_json(&txs)?;
        }
        Commands::BlockTimes { heights } => {
            print_json(&service.block_times(&heights).await?)?;
        }
        Commands::Params { height } => {
            print_json(&service.params(height).await?)?;
        }
        Commands::Rewards { address } => {
            let months = service.monthly_rewards(&address).await?;
            tracing::info!(address = %address, months = months.len(), "monthly rewards computed");
            print_json(&months)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
