use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crossterm::event::KeyEvent;
use time::OffsetDateTime;

use crate::discovery::{AggregationOutcome, RoundId};
use crate::error::SetupError;
use crate::providers::ProviderConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub ocp_version: String,
    pub mtv_version: String,
    pub cnv_version: String,
    pub iib: String,
    pub api_url: String,
    pub console_url: String,
}

impl ClusterInfo {
    /// MTV version with the IIB appended when one is known.
    pub fn mtv_display(&self) -> String {
        if self.iib.is_empty() || self.iib == "N/A" || self.mtv_version == "Not installed" {
            self.mtv_version.clone()
        } else {
            format!("{} ({})", self.mtv_version, self.iib)
        }
    }

    pub fn login_command(&self, password: &str) -> String {
        format!(
            "oc login --insecure-skip-tls-verify=true {} -u kubeadmin -p {}",
            self.api_url, password
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmInfo {
    pub name: String,
    pub provider: String,
    pub power_state: String,
    pub uuid: String,
    pub cpu: u32,
    pub memory_mb: u64,
    pub guest_os: String,
    pub ip_addresses: Vec<String>,
    pub storage_gb: f64,
    pub created: Option<OffsetDateTime>,
    pub modified: Option<OffsetDateTime>,
    pub tags: Vec<String>,
    pub cluster: String,
    pub host: String,
    pub resource_pool: String,
    pub networks: Vec<String>,
}

impl VmInfo {
    pub fn is_running(&self) -> bool {
        matches!(
            self.power_state.as_str(),
            "running" | "poweredOn" | "up" | "ACTIVE"
        )
    }

    /// Field/value pairs shown in the VM details pane.
    pub fn detail_rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("Name", self.name.clone()),
            ("Provider", self.provider.clone()),
            ("Power", self.power_state.clone()),
            ("UUID", self.uuid.clone()),
            ("CPU", self.cpu.to_string()),
            ("Memory", format!("{:.1} GB", self.memory_mb as f64 / 1024.0)),
            ("Guest OS", self.guest_os.clone()),
            ("IPs", self.ip_addresses.join(", ")),
            ("Networks", self.networks.join(", ")),
        ];
        if self.storage_gb > 0.0 {
            rows.push(("Storage", format!("{:.1} GB", self.storage_gb)));
        }
        if !self.tags.is_empty() {
            rows.push(("Tags", self.tags.join(", ")));
        }
        for (label, value) in [
            ("Cluster", &self.cluster),
            ("Host", &self.host),
            ("Pool", &self.resource_pool),
        ] {
            if !value.is_empty() {
                rows.push((label, value.clone()));
            }
        }
        if let Some(created) = self.created {
            rows.push(("Created", format_timestamp(created)));
        }
        if let Some(modified) = self.modified {
            rows.push(("Modified", format_timestamp(modified)));
        }
        rows
    }
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| ts.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterStatus {
    Online,
    Offline(String),
    Timeout,
    Loading,
}

impl ClusterStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ClusterStatus::Online => "Online",
            ClusterStatus::Offline(_) => "Offline",
            ClusterStatus::Timeout => "Timeout",
            ClusterStatus::Loading => "Loading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEntry {
    pub name: String,
    pub status: ClusterStatus,
    pub info: Option<ClusterInfo>,
}

impl ClusterEntry {
    pub fn accessible(&self) -> bool {
        matches!(self.status, ClusterStatus::Online | ClusterStatus::Loading)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Connecting,
    Connected,
    Error(String),
}

impl ProviderStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderStatus::Connecting => "Connecting",
            ProviderStatus::Connected => "Connected",
            ProviderStatus::Error(_) => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: String,
    pub status: ProviderStatus,
    pub vm_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Cluster,
    Provider,
    Vm,
}

/// A row of any browsable list. Search and rendering both go through `fields`.
#[derive(Debug, Clone, Copy)]
pub enum ItemRef<'a> {
    Cluster(&'a ClusterEntry),
    Provider(&'a ProviderEntry),
    Vm(&'a VmInfo),
}

impl<'a> ItemRef<'a> {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemRef::Cluster(_) => ItemKind::Cluster,
            ItemRef::Provider(_) => ItemKind::Provider,
            ItemRef::Vm(_) => ItemKind::Vm,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            ItemRef::Cluster(c) => &c.name,
            ItemRef::Provider(p) => &p.name,
            ItemRef::Vm(vm) => &vm.name,
        }
    }

    /// Every field the item displays anywhere in its screen.
    pub fn fields(&self) -> Vec<String> {
        match self {
            ItemRef::Cluster(c) => {
                let mut fields = vec![c.name.clone(), c.status.label().to_string()];
                if let Some(info) = &c.info {
                    fields.extend([
                        info.ocp_version.clone(),
                        info.mtv_version.clone(),
                        info.cnv_version.clone(),
                    ]);
                }
                fields
            }
            ItemRef::Provider(p) => vec![
                p.name.clone(),
                p.kind.clone(),
                p.status.label().to_string(),
                p.vm_count.to_string(),
            ],
            ItemRef::Vm(vm) => {
                let mut fields = vec![
                    vm.name.clone(),
                    vm.provider.clone(),
                    vm.power_state.clone(),
                    vm.guest_os.clone(),
                ];
                fields.extend(vm.ip_addresses.iter().cloned());
                fields.extend(vm.networks.iter().cloned());
                fields.extend(vm.tags.iter().cloned());
                fields
            }
        }
    }

    /// Case-insensitive substring match; an empty query matches everything.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        self.fields()
            .iter()
            .any(|field| field.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPane {
    List,
    Detail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserPane {
    Providers,
    Vms,
    Details,
}

impl BrowserPane {
    pub fn next(self) -> Self {
        match self {
            BrowserPane::Providers => BrowserPane::Vms,
            BrowserPane::Vms => BrowserPane::Details,
            BrowserPane::Details => BrowserPane::Providers,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            BrowserPane::Providers => BrowserPane::Details,
            BrowserPane::Vms => BrowserPane::Providers,
            BrowserPane::Details => BrowserPane::Vms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    MainMenu,
    Clusters(ClusterPane),
    ClusterDetail,
    Providers(BrowserPane),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub severity: Severity,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterScope {
    All,
    One(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderScope {
    All,
    One(String, ProviderConfig),
}

/// Requests emitted by the state machine; the runtime turns them into background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DispatchClusters { round: RoundId, scope: ClusterScope },
    DispatchProviders { round: RoundId, scope: ProviderScope },
    FetchClusterSecret { name: String },
    CopyToClipboard { label: String, text: String },
    Quit,
}

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize(u16, u16),
    Tick,
    ClustersAggregated {
        round: RoundId,
        result: Result<AggregationOutcome<ClusterInfo>, SetupError>,
    },
    ProvidersDiscovered {
        round: RoundId,
        result: Result<BTreeMap<String, ProviderConfig>, SetupError>,
    },
    ProvidersAggregated {
        round: RoundId,
        outcome: AggregationOutcome<Vec<VmInfo>>,
    },
    ClusterSecretLoaded {
        name: String,
        result: Result<String, String>,
    },
    ClipboardResult {
        label: String,
        result: Result<(), String>,
    },
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Cluster => "cluster",
            ItemKind::Provider => "provider",
            ItemKind::Vm => "vm",
        };
        f.write_str(name)
    }
}
