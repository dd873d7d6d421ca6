mod cli;
mod commands;
mod metrics;

use clap::Parser;
use cli::{Cli, Command, KeysCommand};
use commands::*;
use relay_config::RelayConfig;
use relay_dispatcher::{ApiKeyService, Groups};
use relay_storage::KeyStore;
use relay_store_sqlite::SqliteKeyStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn config_path(cli: &Cli) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(RelayConfig::default_path()?),
    }
}

async fn open_store(
    cli: &Cli,
    config: &RelayConfig,
) -> Result<Arc<dyn KeyStore>, Box<dyn std::error::Error>> {
    let store = match cli.database_url.as_deref().or(config.database_url.as_deref()) {
        Some(url) => SqliteKeyStore::open(url).await?,
        None => SqliteKeyStore::open_default().await?,
    };
    Ok(Arc::new(store))
}

fn groups(names: &[String]) -> Groups {
    names.iter().cloned().collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)?;
        tracing::info!(%addr, "serving metrics");
    }

    let path = config_path(&cli)?;
    if let Command::InitConfig { cluster, force } = &cli.command {
        return cmd_init_config(&path, cluster.as_deref(), *force);
    }

    let config = RelayConfig::load_or_default(&path)?;
    let store = open_store(&cli, &config).await?;

    match cli.command {
        Command::Keys { keys_cmd } => {
            let svc = ApiKeyService::new(store);
            match keys_cmd {
                KeysCommand::Init { team, group } => cmd_keys_init(&svc, &team, &group).await?,
                KeysCommand::List { groups: names } => cmd_keys_list(&svc, &groups(&names)).await?,
                KeysCommand::Show {
                    team,
                    groups: names,
                    limit,
                } => cmd_keys_show(&svc, &team, &groups(&names), limit).await?,
                KeysCommand::Rotate { team, groups: names } => {
                    cmd_keys_rotate(&svc, &team, &groups(&names)).await?
                }
                KeysCommand::Purge { team, groups: names } => {
                    cmd_keys_purge(&svc, &team, &groups(&names)).await?
                }
            }
        }
        Command::Teams { groups: names } => {
            cmd_teams(&ApiKeyService::new(store), &groups(&names)).await?
        }
        Command::Run { cluster, context } => {
            cmd_run(&config, store, cluster, context.as_deref()).await?
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}
