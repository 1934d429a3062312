use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode, redirect};
use serde_json::Value;
use tracing::debug;

use crate::discovery::Connector;
use crate::error::{ConnectorError, SetupError};
use crate::model::ClusterInfo;

const NOT_INSTALLED: &str = "Not installed";
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Lists the cluster names a round should probe.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<String>, SetupError>;
}

#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, name: &str) -> Result<(), ConnectorError>;
    async fn fetch_info(&self, name: &str) -> Result<ClusterInfo, ConnectorError>;
    async fn fetch_secret(&self, name: &str) -> Result<String, ConnectorError>;
}

/// Login followed by info fetch, as one discovery unit.
pub struct ClusterProbe {
    connector: Arc<dyn ClusterConnector>,
}

impl ClusterProbe {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Connector for ClusterProbe {
    type Info = ClusterInfo;

    async fn probe(&self, target: &str) -> Result<ClusterInfo, ConnectorError> {
        self.connector.connect(target).await?;
        self.connector.fetch_info(target).await
    }
}

/// Cluster directories under a shared mount, filtered by name prefix.
pub struct FsTargetDirectory {
    root: PathBuf,
    prefixes: Vec<String>,
}

impl FsTargetDirectory {
    pub fn new(root: impl Into<PathBuf>, prefixes: Vec<String>) -> Self {
        Self {
            root: root.into(),
            prefixes,
        }
    }
}

#[async_trait]
impl TargetDirectory for FsTargetDirectory {
    async fn enumerate(&self) -> Result<Vec<String>, SetupError> {
        let setup_err = |e: std::io::Error| SetupError::Enumerate {
            path: self.root.display().to_string(),
            reason: e.to_string(),
        };
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(setup_err)?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(setup_err)? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && self.prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                names.push(name);
            }
        }
        names.sort();
        debug!("Found {} clusters under {}", names.len(), self.root.display());
        Ok(names)
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    pub token: String,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl TokenCache {
    /// True once the token is within 10% of its TTL (at least 1s, at most 120s) of expiring.
    pub fn should_refresh(&self, now: Instant) -> bool {
        let ttl_secs = self.ttl.as_secs().max(1);
        let threshold = Duration::from_secs((ttl_secs / 10).clamp(1, 120));
        now + threshold >= self.fetched_at + self.ttl
    }
}

/// Where a cluster's API, OAuth server and console live.
#[derive(Debug, Clone)]
pub enum Endpoints {
    /// `api.<name>.<domain>:6443` and friends.
    Domain(String),
    /// The same URLs for every cluster.
    Fixed {
        api: String,
        oauth: String,
        console: String,
    },
}

impl Endpoints {
    pub fn api(&self, name: &str) -> String {
        match self {
            Endpoints::Domain(domain) => format!("https://api.{name}.{domain}:6443"),
            Endpoints::Fixed { api, .. } => api.clone(),
        }
    }

    pub fn oauth(&self, name: &str) -> String {
        match self {
            Endpoints::Domain(domain) => format!("https://oauth-openshift.apps.{name}.{domain}"),
            Endpoints::Fixed { oauth, .. } => oauth.clone(),
        }
    }

    pub fn console(&self, name: &str) -> String {
        match self {
            Endpoints::Domain(domain) => {
                format!("https://console-openshift-console.apps.{name}.{domain}")
            }
            Endpoints::Fixed { console, .. } => console.clone(),
        }
    }
}

/// Talks to OpenShift over its REST API as kubeadmin.
pub struct OpenShiftConnector {
    clusters_root: PathBuf,
    endpoints: Endpoints,
    http: Client,
    tokens: Mutex<HashMap<String, TokenCache>>,
}

impl OpenShiftConnector {
    pub fn new(
        clusters_root: impl Into<PathBuf>,
        endpoints: Endpoints,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            clusters_root: clusters_root.into(),
            endpoints,
            http,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn password_path(&self, name: &str) -> PathBuf {
        self.clusters_root
            .join(name)
            .join("auth")
            .join("kubeadmin-password")
    }

    fn cached_token(&self, name: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(name)
            .filter(|tc| !tc.should_refresh(Instant::now()))
            .map(|tc| tc.token.clone())
    }

    async fn token(&self, name: &str) -> Result<String, ConnectorError> {
        if let Some(token) = self.cached_token(name) {
            return Ok(token);
        }
        let password = self.fetch_secret(name).await?;
        let cache = self.login(name, &password).await?;
        let token = cache.token.clone();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), cache);
        Ok(token)
    }

    async fn login(&self, name: &str, password: &str) -> Result<TokenCache, ConnectorError> {
        let login_err = |reason: String| ConnectorError::Login {
            target: name.to_string(),
            reason,
        };
        let url = format!(
            "{}/oauth/authorize?client_id=openshift-challenging-client&response_type=token",
            self.endpoints.oauth(name)
        );
        debug!("Logging in to {name}");
        let resp = self
            .http
            .get(&url)
            .basic_auth("kubeadmin", Some(password))
            .header("X-CSRF-Token", "1")
            .send()
            .await
            .map_err(|e| login_err(e.to_string()))?;

        if resp.status() != StatusCode::FOUND {
            return Err(login_err(format!("unexpected status {}", resp.status())));
        }
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| login_err("redirect without location".to_string()))?;
        let (token, ttl) = parse_token_fragment(location)
            .ok_or_else(|| login_err("no access token in redirect".to_string()))?;
        debug!("Token for {name} acquired, ttl={:?}", ttl);
        Ok(TokenCache {
            token,
            fetched_at: Instant::now(),
            ttl,
        })
    }

    async fn get_json(&self, url: &str, token: &str) -> Result<Value, reqwest::Error> {
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }

    /// Version of the first CSV in `namespace` whose name starts with `prefix`.
    async fn operator_version(&self, name: &str, token: &str, namespace: &str, prefix: &str) -> String {
        let url = format!(
            "{}/apis/operators.coreos.com/v1alpha1/namespaces/{namespace}/clusterserviceversions",
            self.endpoints.api(name)
        );
        match self.get_json(&url, token).await {
            Ok(v) => v["items"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|csv| {
                    csv["metadata"]["name"]
                        .as_str()
                        .is_some_and(|n| n.starts_with(prefix))
                })
                .and_then(|csv| csv["spec"]["version"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| NOT_INSTALLED.to_string()),
            Err(e) => {
                debug!("CSV lookup in {namespace} on {name} failed: {e}");
                NOT_INSTALLED.to_string()
            }
        }
    }

    async fn mtv_iib(&self, name: &str, token: &str) -> String {
        let url = format!(
            "{}/apis/operators.coreos.com/v1alpha1/namespaces/openshift-marketplace/catalogsources",
            self.endpoints.api(name)
        );
        let Ok(v) = self.get_json(&url, token).await else {
            return "N/A".to_string();
        };
        v["items"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|src| {
                src["metadata"]["name"]
                    .as_str()
                    .is_some_and(|n| n.contains("mtv") || n.contains("iib"))
            })
            .find_map(|src| src["spec"]["image"].as_str())
            .and_then(|image| image.rsplit('/').next())
            .map(str::to_string)
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Extracts `access_token` and `expires_in` from an implicit-grant redirect.
fn parse_token_fragment(location: &str) -> Option<(String, Duration)> {
    let (_, fragment) = location.split_once('#')?;
    let mut token = None;
    let mut ttl = DEFAULT_TOKEN_TTL;
    for pair in fragment.split('&') {
        match pair.split_once('=') {
            Some(("access_token", value)) if !value.is_empty() => token = Some(value.to_string()),
            Some(("expires_in", value)) => {
                if let Ok(secs) = value.parse::<u64>() {
                    ttl = Duration::from_secs(secs.max(1));
                }
            }
            _ => {}
        }
    }
    token.map(|t| (t, ttl))
}

#[async_trait]
impl ClusterConnector for OpenShiftConnector {
    async fn connect(&self, name: &str) -> Result<(), ConnectorError> {
        self.token(name).await.map(|_| ())
    }

    async fn fetch_info(&self, name: &str) -> Result<ClusterInfo, ConnectorError> {
        let token = self.token(name).await?;
        let api = self.endpoints.api(name);
        let version = self
            .get_json(
                &format!("{api}/apis/config.openshift.io/v1/clusterversions/version"),
                &token,
            )
            .await
            .map_err(|e| ConnectorError::Info {
                target: name.to_string(),
                reason: e.to_string(),
            })?;
        let ocp_version = version["status"]["desired"]["version"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        let (mtv_version, cnv_version, iib) = tokio::join!(
            self.operator_version(name, &token, "openshift-mtv", "mtv-operator"),
            self.operator_version(name, &token, "openshift-cnv", "kubevirt-hyperconverged-operator"),
            self.mtv_iib(name, &token),
        );

        Ok(ClusterInfo {
            name: name.to_string(),
            ocp_version,
            mtv_version,
            cnv_version,
            iib,
            api_url: api,
            console_url: self.endpoints.console(name),
        })
    }

    async fn fetch_secret(&self, name: &str) -> Result<String, ConnectorError> {
        let path = self.password_path(name);
        tokio::fs::read_to_string(&path)
            .await
            .map(|pw| pw.trim().to_string())
            .map_err(|e| ConnectorError::Secret {
                target: name.to_string(),
                reason: format!("{}: {e}", path.display()),
            })
    }
}
