use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use super::{ProviderConfig, ProviderKind, VmProvider};
use crate::error::ProviderError;
use crate::model::VmInfo;

const DEFAULT_REGION: &str = "regionOne";
const TOKEN_HEADER: &str = "X-Auth-Token";

struct Session {
    token: String,
    compute: String,
}

/// Keystone v3 for auth, Nova for servers.
pub struct OpenStackProvider {
    auth_url: String,
    username: String,
    password: String,
    tenant_name: String,
    region: String,
    user_domain_name: Option<String>,
    user_domain_id: Option<String>,
    project_domain_id: Option<String>,
    http: Client,
    session: Option<Session>,
}

impl OpenStackProvider {
    pub fn new(config: &ProviderConfig, http: Client) -> Self {
        let auth_url = config.url.trim_end_matches('/');
        let auth_url = if auth_url.ends_with("/v3") {
            auth_url.to_string()
        } else {
            format!("{auth_url}/v3")
        };
        Self {
            auth_url,
            username: config.username.clone(),
            password: config.password.clone(),
            tenant_name: config.extra("tenant_name").unwrap_or_default().to_string(),
            region: config.extra("region").unwrap_or(DEFAULT_REGION).to_string(),
            user_domain_name: config.extra("user_domain_name").map(str::to_string),
            user_domain_id: config.extra("user_domain_id").map(str::to_string),
            project_domain_id: config.extra("project_domain_id").map(str::to_string),
            http,
            session: None,
        }
    }

    /// Password auth scoped to the project. A domain id wins over a domain name.
    fn auth_body(&self) -> Value {
        let user_domain = match (&self.user_domain_id, &self.user_domain_name) {
            (Some(id), _) => json!({"id": id}),
            (None, Some(name)) => json!({"name": name}),
            (None, None) => json!({"id": "default"}),
        };
        let project_domain = match &self.project_domain_id {
            Some(id) => json!({"id": id}),
            None => user_domain.clone(),
        };
        json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.username,
                            "password": self.password,
                            "domain": user_domain,
                        }
                    }
                },
                "scope": {
                    "project": {"name": self.tenant_name, "domain": project_domain}
                }
            }
        })
    }

    fn connect_err(reason: impl Into<String>) -> ProviderError {
        ProviderError::Connect {
            kind: "openstack",
            reason: reason.into(),
        }
    }
}

/// Public compute endpoint for `region` from a Keystone token body.
fn compute_endpoint(token_body: &Value, region: &str) -> Option<String> {
    token_body["token"]["catalog"]
        .as_array()?
        .iter()
        .filter(|svc| svc["type"] == "compute")
        .flat_map(|svc| svc["endpoints"].as_array().into_iter().flatten())
        .find(|ep| {
            ep["interface"] == "public"
                && (ep["region_id"] == region || ep["region"] == region)
        })
        .and_then(|ep| ep["url"].as_str())
        .map(|url| url.trim_end_matches('/').to_string())
}

fn timestamp(v: &Value) -> Option<OffsetDateTime> {
    v.as_str().and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

fn to_vm(server: &Value) -> VmInfo {
    let mut networks = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Some(addresses) = server["addresses"].as_object() {
        for (network, addrs) in addresses {
            networks.push(network.clone());
            ip_addresses.extend(
                addrs
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|a| a["addr"].as_str())
                    .map(str::to_string),
            );
        }
    }
    let flavor = &server["flavor"];
    let tags = flavor["id"]
        .as_str()
        .or_else(|| flavor["original_name"].as_str())
        .map(|f| vec![format!("flavor:{f}")])
        .unwrap_or_default();

    VmInfo {
        name: server["name"].as_str().unwrap_or_default().to_string(),
        provider: ProviderKind::OpenStack.to_string(),
        power_state: server["status"].as_str().unwrap_or_default().to_string(),
        uuid: server["id"].as_str().unwrap_or_default().to_string(),
        cpu: flavor["vcpus"].as_u64().unwrap_or(0) as u32,
        memory_mb: flavor["ram"].as_u64().unwrap_or(0),
        guest_os: server["image"]["name"].as_str().unwrap_or_default().to_string(),
        ip_addresses,
        created: timestamp(&server["created"]),
        modified: timestamp(&server["updated"]),
        tags,
        host: server["OS-EXT-SRV-ATTR:host"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        networks,
        ..Default::default()
    }
}

#[async_trait]
impl VmProvider for OpenStackProvider {
    async fn connect(&mut self) -> Result<(), ProviderError> {
        let resp = self
            .http
            .post(format!("{}/auth/tokens", self.auth_url))
            .json(&self.auth_body())
            .send()
            .await
            .map_err(|e| Self::connect_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::connect_err(format!(
                "keystone returned {}",
                resp.status()
            )));
        }
        let token = resp
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Self::connect_err("keystone response without X-Subject-Token"))?;
        let body: Value = resp.json().await?;
        let compute = compute_endpoint(&body, &self.region).ok_or_else(|| {
            Self::connect_err(format!("no public compute endpoint in region {}", self.region))
        })?;
        debug!("OpenStack compute endpoint {compute}");
        self.session = Some(Session { token, compute });
        Ok(())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>, ProviderError> {
        let session = self
            .session
            .as_ref()
            .ok_or(ProviderError::NotConnected("openstack"))?;
        let data: Value = self
            .http
            .get(format!("{}/servers/detail", session.compute))
            .header(TOKEN_HEADER, &session.token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ProviderError::List(e.to_string()))?
            .json()
            .await?;
        Ok(data["servers"]
            .as_array()
            .map(|servers| servers.iter().map(to_vm).collect())
            .unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.session = None;
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenStack
    }
}
