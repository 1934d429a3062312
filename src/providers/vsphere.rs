use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ProviderConfig, ProviderKind, VmProvider};
use crate::error::ProviderError;
use crate::model::VmInfo;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// vCenter through the Automation REST API.
pub struct VSphereProvider {
    base: String,
    username: String,
    password: String,
    http: Client,
    session: Option<String>,
}

impl VSphereProvider {
    pub fn new(config: &ProviderConfig, http: Client) -> Self {
        let base = config.url.trim_end_matches('/');
        let base = base.strip_suffix("/sdk").unwrap_or(base);
        Self {
            base: base.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            session: None,
        }
    }
}

fn power_state(raw: &str) -> String {
    match raw {
        "POWERED_ON" => "poweredOn",
        "POWERED_OFF" => "poweredOff",
        "SUSPENDED" => "suspended",
        other => other,
    }
    .to_string()
}

fn to_vm(item: &Value) -> VmInfo {
    VmInfo {
        name: item["name"].as_str().unwrap_or_default().to_string(),
        provider: ProviderKind::VSphere.to_string(),
        power_state: power_state(item["power_state"].as_str().unwrap_or_default()),
        uuid: item["vm"].as_str().unwrap_or_default().to_string(),
        cpu: item["cpu_count"].as_u64().unwrap_or(0) as u32,
        memory_mb: item["memory_size_MiB"].as_u64().unwrap_or(0),
        ..Default::default()
    }
}

#[async_trait]
impl VmProvider for VSphereProvider {
    async fn connect(&mut self) -> Result<(), ProviderError> {
        let resp = self
            .http
            .post(format!("{}/api/session", self.base))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ProviderError::Connect {
                kind: "vmware",
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(ProviderError::Connect {
                kind: "vmware",
                reason: format!("session request returned {}", resp.status()),
            });
        }
        let session: Value = resp.json().await?;
        let session = session
            .as_str()
            .ok_or_else(|| ProviderError::Connect {
                kind: "vmware",
                reason: "malformed session response".to_string(),
            })?
            .to_string();
        debug!("vSphere session opened on {}", self.base);
        self.session = Some(session);
        Ok(())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>, ProviderError> {
        let session = self
            .session
            .as_deref()
            .ok_or(ProviderError::NotConnected("vmware"))?;
        let data: Value = self
            .http
            .get(format!("{}/api/vcenter/vm", self.base))
            .header(SESSION_HEADER, session)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::List(e.to_string()))?
            .json()
            .await?;
        Ok(data
            .as_array()
            .map(|items| items.iter().map(to_vm).collect())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        self.http
            .delete(format!("{}/api/session", self.base))
            .header(SESSION_HEADER, session)
            .send()
            .await?;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::VSphere
    }
}
