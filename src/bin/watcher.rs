use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_watcher::chain::{ChainClient, EvmChain};
use wallet_watcher::config::{AppSettings, Config};
use wallet_watcher::notifier::{DiscordWebhook, Notifier};
use wallet_watcher::price::{CoinGeckoSource, PriceCache};
use wallet_watcher::service::{ServiceStatus, WatcherService};

#[derive(Parser)]
#[command(name = "wallet-watcher")]
#[command(about = "Watch EVM wallets and post their transactions to Discord", long_about = None)]
struct Cli {
    /// Settings file listing endpoints and wallets
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

enum Command {
    Start,
    Stop,
    Status,
    Exit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "start" => Some(Command::Start),
            "stop" => Some(Command::Stop),
            "status" => Some(Command::Status),
            "exit" => Some(Command::Exit),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    info!("Starting wallet watcher");

    let mut config = Config::from_env()?;
    if let Some(path) = cli.settings {
        config.settings_path = path;
    }
    let settings = AppSettings::load(&config.settings_path)?;
    info!(
        "Loaded {} endpoint(s) and {} wallet(s) from {}",
        settings.evm_endpoints.len(),
        settings.wallets.len(),
        config.settings_path.display()
    );

    let mut chains: HashMap<String, Arc<dyn ChainClient>> = HashMap::new();
    for endpoint in &settings.evm_endpoints {
        let chain = EvmChain::new(&endpoint.rpc_url)
            .with_context(|| format!("Failed to connect to endpoint {}", endpoint.name))?;
        chains.insert(endpoint.name.clone(), Arc::new(chain));
    }

    let source = Arc::new(CoinGeckoSource::new(&config.coingecko_api_url)?);
    let prices = PriceCache::load(source, &config.price_currency)
        .await
        .context("Failed to load the price token list")?;
    let notifier = Arc::new(Notifier::new(Arc::new(DiscordWebhook::new()?), Arc::new(prices)));

    let mut service = WatcherService::new(&config, &settings, &chains, notifier);
    service.start();

    info!("Commands: start, stop, status, exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    stdin_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(Command::Start) => {
                        service.start();
                    }
                    Some(Command::Stop) => service.stop().await,
                    Some(Command::Status) => info!("Watcher is {}", service.status()),
                    Some(Command::Exit) => break,
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    if service.status() == ServiceStatus::Running {
        service.stop().await;
    }

    Ok(())
}
