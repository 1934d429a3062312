use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::{ProviderConfig, ProviderKind, VmProvider};
use crate::error::ProviderError;
use crate::model::VmInfo;

/// oVirt / RHV engine through its v4 REST API.
pub struct OvirtProvider {
    base: String,
    username: String,
    password: String,
    http: Client,
    connected: bool,
}

impl OvirtProvider {
    pub fn new(config: &ProviderConfig, http: Client) -> Self {
        Self {
            base: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
            connected: false,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base))
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
    }
}

/// Engine status names mapped onto the console's power states.
pub fn power_state(status: &str) -> &'static str {
    match status {
        "up" => "running",
        "down" => "poweredoff",
        "powering_up" => "powering_on",
        "powering_down" => "powering_off",
        "suspended" => "suspended",
        "image_locked" => "locked",
        "migrating" => "migrating",
        "not_responding" => "not_responding",
        "wait_for_launch" => "waiting",
        "saving_state" => "saving",
        "restoring_state" => "restoring",
        _ => "unknown",
    }
}

/// The engine encodes numbers as JSON strings.
fn number(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn to_vm(item: &Value) -> VmInfo {
    let topology = &item["cpu"]["topology"];
    let cpu = ["cores", "sockets", "threads"]
        .iter()
        .map(|k| number(&topology[*k]).unwrap_or(1))
        .fold(1u64, u64::saturating_mul);
    VmInfo {
        name: item["name"].as_str().unwrap_or_default().to_string(),
        provider: ProviderKind::Ovirt.to_string(),
        power_state: power_state(item["status"].as_str().unwrap_or_default()).to_string(),
        uuid: item["id"].as_str().unwrap_or_default().to_string(),
        cpu: u32::try_from(cpu).unwrap_or(u32::MAX),
        memory_mb: number(&item["memory"]).unwrap_or(0) / (1024 * 1024),
        guest_os: item["os"]["type"].as_str().unwrap_or_default().to_string(),
        cluster: item["cluster"]["id"].as_str().unwrap_or_default().to_string(),
        host: item["host"]["id"].as_str().unwrap_or_default().to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl VmProvider for OvirtProvider {
    async fn connect(&mut self) -> Result<(), ProviderError> {
        let resp = self.get("").send().await.map_err(|e| ProviderError::Connect {
            kind: "ovirt",
            reason: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(ProviderError::Connect {
                kind: "ovirt",
                reason: format!("engine returned {}", resp.status()),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>, ProviderError> {
        if !self.connected {
            return Err(ProviderError::NotConnected("ovirt"));
        }
        let data: Value = self
            .get("/vms")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::List(e.to_string()))?
            .json()
            .await?;
        Ok(data["vm"]
            .as_array()
            .map(|items| items.iter().map(to_vm).collect())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.connected = false;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ovirt
    }
}
