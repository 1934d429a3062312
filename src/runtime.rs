//! Executes the commands the state machine emits and feeds results back as events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clipboard::{ClipboardContext, ClipboardProvider};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterConnector, ClusterProbe, TargetDirectory};
use crate::discovery::{AggregationOutcome, aggregate};
use crate::error::SetupError;
use crate::model::{AppEvent, ClusterInfo, ClusterScope, Command, ProviderScope, VmInfo};
use crate::providers::{ProviderConfig, ProviderFactory, ProviderProbe};

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<(), String>;
}

/// The desktop clipboard. A fresh context per copy.
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), String> {
        let mut ctx: ClipboardContext = ClipboardProvider::new().map_err(|e| e.to_string())?;
        ctx.set_contents(text.to_string()).map_err(|e| e.to_string())
    }
}

/// One cluster round: enumerate (unless a single target is given), then probe.
pub async fn cluster_round(
    directory: &dyn TargetDirectory,
    connector: Arc<dyn ClusterConnector>,
    scope: ClusterScope,
    budget: Duration,
) -> Result<AggregationOutcome<ClusterInfo>, SetupError> {
    let targets = match scope {
        ClusterScope::All => directory.enumerate().await?,
        ClusterScope::One(name) => vec![name],
    };
    let probe = Arc::new(ClusterProbe::new(connector));
    Ok(aggregate(probe, &targets, budget).await)
}

/// Loads provider configs off the async runtime; no providers at all is a setup failure.
pub async fn provider_configs(
    factory: Arc<dyn ProviderFactory>,
) -> Result<BTreeMap<String, ProviderConfig>, SetupError> {
    let configs = tokio::task::spawn_blocking(move || factory.load_configs())
        .await
        .map_err(|e| SetupError::ProviderConfig(e.to_string()))?
        .map_err(|e| SetupError::ProviderConfig(e.to_string()))?;
    if configs.is_empty() {
        return Err(SetupError::NoProviders);
    }
    Ok(configs)
}

pub async fn provider_round(
    factory: Arc<dyn ProviderFactory>,
    configs: BTreeMap<String, ProviderConfig>,
    budget: Duration,
) -> AggregationOutcome<Vec<VmInfo>> {
    let targets: Vec<String> = configs.keys().cloned().collect();
    let probe = Arc::new(ProviderProbe::new(factory, configs));
    aggregate(probe, &targets, budget).await
}

pub struct Runtime {
    directory: Arc<dyn TargetDirectory>,
    connector: Arc<dyn ClusterConnector>,
    factory: Arc<dyn ProviderFactory>,
    clipboard: Arc<dyn Clipboard>,
    cluster_budget: Duration,
    provider_budget: Duration,
    tx: UnboundedSender<AppEvent>,
}

impl Runtime {
    pub fn new(
        directory: Arc<dyn TargetDirectory>,
        connector: Arc<dyn ClusterConnector>,
        factory: Arc<dyn ProviderFactory>,
        clipboard: Arc<dyn Clipboard>,
        cluster_budget: Duration,
        provider_budget: Duration,
        tx: UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            directory,
            connector,
            factory,
            clipboard,
            cluster_budget,
            provider_budget,
            tx,
        }
    }

    /// Starts the work behind `cmd`. Returns false once the app asked to quit.
    pub fn execute(&self, cmd: Command) -> bool {
        match cmd {
            Command::DispatchClusters { round, scope } => {
                let directory = Arc::clone(&self.directory);
                let connector = Arc::clone(&self.connector);
                let budget = self.cluster_budget;
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    debug!("Cluster round {round} ({scope:?}) dispatched");
                    let result = cluster_round(directory.as_ref(), connector, scope, budget).await;
                    if let Err(e) = &result {
                        warn!("Cluster round {round} failed: {e}");
                    }
                    let _ = tx.send(AppEvent::ClustersAggregated { round, result });
                });
            }
            Command::DispatchProviders { round, scope } => {
                let factory = Arc::clone(&self.factory);
                let budget = self.provider_budget;
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let configs = match scope {
                        ProviderScope::All => {
                            let result = provider_configs(Arc::clone(&factory)).await;
                            let configs = result.as_ref().ok().cloned();
                            let _ = tx.send(AppEvent::ProvidersDiscovered { round, result });
                            match configs {
                                Some(configs) => configs,
                                None => return,
                            }
                        }
                        ProviderScope::One(name, config) => BTreeMap::from([(name, config)]),
                    };
                    info!("Provider round {round}: {} providers", configs.len());
                    let outcome = provider_round(factory, configs, budget).await;
                    let _ = tx.send(AppEvent::ProvidersAggregated { round, outcome });
                });
            }
            Command::FetchClusterSecret { name } => {
                let connector = Arc::clone(&self.connector);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = connector
                        .fetch_secret(&name)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = tx.send(AppEvent::ClusterSecretLoaded { name, result });
                });
            }
            Command::CopyToClipboard { label, text } => {
                let clipboard = Arc::clone(&self.clipboard);
                let tx = self.tx.clone();
                tokio::task::spawn_blocking(move || {
                    let result = clipboard.copy(&text);
                    let _ = tx.send(AppEvent::ClipboardResult { label, result });
                });
            }
            Command::Quit => return false,
        }
        true
    }
}
