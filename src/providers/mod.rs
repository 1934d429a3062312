pub mod config;
pub mod openstack;
pub mod ovirt;
pub mod vsphere;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::discovery::Connector;
use crate::error::{ConfigError, ConnectorError, ProviderError};
use crate::model::VmInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    VSphere,
    Ovirt,
    OpenStack,
}

impl ProviderKind {
    /// Accepts the type names used in provider configs and on the command line.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "vmware" | "vsphere" => Some(ProviderKind::VSphere),
            "ovirt" | "rhv" => Some(ProviderKind::Ovirt),
            "openstack" => Some(ProviderKind::OpenStack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::VSphere => "vmware",
            ProviderKind::Ovirt => "ovirt",
            ProviderKind::OpenStack => "openstack",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details for one source provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_type: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub extra: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn kind(&self) -> Option<ProviderKind> {
        ProviderKind::parse(&self.provider_type)
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Label/value rows of the expandable config tree.
    pub fn tree_rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Type", self.provider_type.clone()),
            ("URL", self.url.clone()),
            ("Username", self.username.clone()),
            ("Password", self.password.clone()),
            ("Insecure", self.insecure.to_string()),
        ]
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("insecure", &self.insecure)
            .field("extra", &self.extra)
            .finish()
    }
}

#[async_trait]
pub trait VmProvider: Send + Sync {
    async fn connect(&mut self) -> Result<(), ProviderError>;
    async fn list_vms(&self) -> Result<Vec<VmInfo>, ProviderError>;

    async fn get_vm(&self, name: &str) -> Result<VmInfo, ProviderError> {
        self.list_vms()
            .await?
            .into_iter()
            .find(|vm| vm.name == name)
            .ok_or_else(|| ProviderError::VmNotFound(name.to_string()))
    }

    async fn close(&mut self) -> Result<(), ProviderError>;
    fn kind(&self) -> ProviderKind;
}

pub trait ProviderFactory: Send + Sync {
    /// Reads every supported provider configuration, keyed by provider name.
    fn load_configs(&self) -> Result<BTreeMap<String, ProviderConfig>, ConfigError>;
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn VmProvider>, ProviderError>;
}

pub(crate) fn http_client(insecure: bool, timeout: Duration) -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .danger_accept_invalid_certs(insecure)
        .timeout(timeout)
        .build()?)
}

/// Builds REST backends from the test project's provider config file.
pub struct DefaultProviderFactory {
    config_path: Option<PathBuf>,
    timeout: Duration,
}

impl DefaultProviderFactory {
    pub fn new(config_path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            config_path,
            timeout,
        }
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn load_configs(&self) -> Result<BTreeMap<String, ProviderConfig>, ConfigError> {
        let path = config::locate(self.config_path.as_deref())?;
        debug!("Loading provider configs from {}", path.display());
        let configs = config::load(&path)?;
        Ok(configs
            .into_iter()
            .filter(|(name, cfg)| {
                let supported = cfg.kind().is_some();
                if !supported {
                    debug!("Skipping provider {name} of type {}", cfg.provider_type);
                }
                supported
            })
            .collect())
    }

    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn VmProvider>, ProviderError> {
        let kind = config
            .kind()
            .ok_or_else(|| ProviderError::Unsupported(config.provider_type.clone()))?;
        let http = http_client(config.insecure, self.timeout)?;
        Ok(match kind {
            ProviderKind::VSphere => Box::new(vsphere::VSphereProvider::new(config, http)),
            ProviderKind::Ovirt => Box::new(ovirt::OvirtProvider::new(config, http)),
            ProviderKind::OpenStack => Box::new(openstack::OpenStackProvider::new(config, http)),
        })
    }
}

/// Connect, list and close one named provider, as one discovery unit.
pub struct ProviderProbe {
    factory: Arc<dyn ProviderFactory>,
    configs: BTreeMap<String, ProviderConfig>,
}

impl ProviderProbe {
    pub fn new(factory: Arc<dyn ProviderFactory>, configs: BTreeMap<String, ProviderConfig>) -> Self {
        Self { factory, configs }
    }
}

#[async_trait]
impl Connector for ProviderProbe {
    type Info = Vec<VmInfo>;

    async fn probe(&self, target: &str) -> Result<Vec<VmInfo>, ConnectorError> {
        let config = self
            .configs
            .get(target)
            .ok_or_else(|| ProviderError::UnknownProvider(target.to_string()))?;
        let mut provider = self.factory.create(config)?;
        let vms = match provider.connect().await {
            Ok(()) => provider.list_vms().await,
            Err(e) => Err(e),
        };
        // A half-open session is still released.
        if let Err(e) = provider.close().await {
            warn!("Closing provider {target} failed: {e}");
        }
        let mut vms = vms?;
        vms.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Provider {target} returned {} VMs", vms.len());
        Ok(vms)
    }
}
