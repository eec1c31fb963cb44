//! Owns the scan tasks: one per (active wallet, endpoint) pair, started and
//! stopped together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::config::{AppSettings, Config, EndpointConfig, WalletConfig};
use crate::notifier::Notifier;
use crate::scanner::WalletScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
        }
    }
}

struct ScanPair {
    wallet: Arc<WalletConfig>,
    endpoint: Arc<EndpointConfig>,
    chain: Arc<dyn ChainClient>,
}

struct RunningScans {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

pub struct WatcherService {
    pairs: Vec<ScanPair>,
    notifier: Arc<Notifier>,
    poll_interval: Duration,
    retry_delay: Duration,
    running: Option<RunningScans>,
}

impl WatcherService {
    /// Resolves every active wallet against its endpoints. Endpoints without a
    /// chain client are left out.
    pub fn new(
        config: &Config,
        settings: &AppSettings,
        chains: &HashMap<String, Arc<dyn ChainClient>>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let endpoints: HashMap<&str, Arc<EndpointConfig>> = settings
            .evm_endpoints
            .iter()
            .map(|e| (e.name.as_str(), Arc::new(e.clone())))
            .collect();

        let mut pairs = Vec::new();
        for wallet in settings.active_wallets() {
            let wallet_arc = Arc::new(wallet.clone());
            for endpoint in settings.endpoints_for_wallet(wallet) {
                let Some(chain) = chains.get(&endpoint.name) else {
                    warn!(
                        wallet = %wallet.name,
                        endpoint = %endpoint.name,
                        "No chain client for endpoint, skipping"
                    );
                    continue;
                };
                if let Some(endpoint) = endpoints.get(endpoint.name.as_str()) {
                    pairs.push(ScanPair {
                        wallet: Arc::clone(&wallet_arc),
                        endpoint: Arc::clone(endpoint),
                        chain: Arc::clone(chain),
                    });
                }
            }
        }

        WatcherService {
            pairs,
            notifier,
            poll_interval: config.poll_interval,
            retry_delay: config.retry_delay,
            running: None,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        match self.running {
            Some(_) => ServiceStatus::Running,
            None => ServiceStatus::Stopped,
        }
    }

    /// Spawns every scan task. Returns the number of tasks started, zero if
    /// the service was already running.
    pub fn start(&mut self) -> usize {
        if self.running.is_some() {
            warn!("Watcher is already running");
            return 0;
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for pair in &self.pairs {
            let scanner = WalletScanner::new(
                Arc::clone(&pair.wallet),
                Arc::clone(&pair.endpoint),
                Arc::clone(&pair.chain),
                Arc::clone(&self.notifier),
                self.poll_interval,
                self.retry_delay,
            );
            tasks.spawn(scanner.run(cancel.child_token()));
        }

        let started = tasks.len();
        info!(tasks = started, "Watcher started");
        self.running = Some(RunningScans { cancel, tasks });
        started
    }

    /// Cancels every scan task and waits for all of them to finish.
    pub async fn stop(&mut self) {
        let Some(RunningScans { cancel, mut tasks }) = self.running.take() else {
            warn!("Watcher is not running");
            return;
        };

        cancel.cancel();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Scan task ended abnormally: {:?}", e);
            }
        }
        info!("Watcher stopped");
    }
}
