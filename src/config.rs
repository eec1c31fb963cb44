use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_SETTINGS_PATH: &str = "appsettings.json";
const DEFAULT_COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
const EXPLORER_HASH_PLACEHOLDER: &str = "{0}";

#[derive(Debug, Clone)]
pub struct Config {
    pub settings_path: PathBuf,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub coingecko_api_url: String,
    pub price_currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let settings_path = std::env::var("WALLET_WATCHER_SETTINGS")
            .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string())
            .into();

        let poll_interval = Duration::from_secs(env_secs("POLL_INTERVAL_SECS", 15)?);
        let retry_delay = Duration::from_secs(env_secs("RETRY_DELAY_SECS", 15)?);

        let coingecko_api_url = std::env::var("COINGECKO_API_URL")
            .unwrap_or_else(|_| DEFAULT_COINGECKO_API_URL.to_string());

        let price_currency = std::env::var("PRICE_CURRENCY")
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|_| "usd".to_string());

        Ok(Config {
            settings_path,
            poll_interval,
            retry_delay,
            coingecko_api_url,
            price_currency,
        })
    }
}

fn env_secs(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => parse_secs(name, &value),
        Err(_) => Ok(default),
    }
}

/// Whole seconds, at least one.
fn parse_secs(name: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a whole number of seconds"))?;
    if secs == 0 {
        anyhow::bail!("{name} must be at least 1 second");
    }
    Ok(secs)
}

/// A chain the watcher can scan. Shared by every wallet that references it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub name: String,
    pub rpc_url: String,
    pub native_token: String,
    #[serde(default)]
    pub explorer_url: Option<String>,
}

impl EndpointConfig {
    /// Fills the `{0}` placeholder of the explorer template with the transaction hash.
    pub fn explorer_link(&self, transaction_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|template| template.replace(EXPLORER_HASH_PLACEHOLDER, transaction_hash))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub name: String,
    pub address: Address,
    pub webhook_url: String,
    #[serde(default)]
    pub evm_endpoints: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

impl WalletConfig {
    pub fn is_address(&self, address: &Address) -> bool {
        self.address == *address
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub evm_endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub wallets: Vec<WalletConfig>,
}

impl AppSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: AppSettings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for endpoint in &self.evm_endpoints {
            if !names.insert(endpoint.name.as_str()) {
                anyhow::bail!("Duplicate endpoint name: {}", endpoint.name);
            }
        }

        for wallet in &self.wallets {
            for endpoint in &wallet.evm_endpoints {
                if !names.contains(endpoint.as_str()) {
                    warn!(
                        wallet = %wallet.name,
                        endpoint = %endpoint,
                        "Wallet references an unknown endpoint, ignoring it"
                    );
                }
            }
        }

        Ok(())
    }

    pub fn active_wallets(&self) -> impl Iterator<Item = &WalletConfig> {
        self.wallets.iter().filter(|w| w.active)
    }

    pub fn endpoints_for_wallet<'a>(
        &'a self,
        wallet: &'a WalletConfig,
    ) -> impl Iterator<Item = &'a EndpointConfig> {
        self.evm_endpoints
            .iter()
            .filter(move |e| wallet.evm_endpoints.iter().any(|name| *name == e.name))
    }
}
