//! Latest MTV operator bundle and index image (IIB) per OCP release, read from
//! the datagrepper archive of container-image build messages.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::LookupError;

const INDEX_BUILT_TOPIC: &str = "/topic/VirtualTopic.eng.ci.redhat-container-image.index.built";
const BUNDLE_FILTER: &str = "mtv-operator-bundle-container";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IibBuild {
    pub ocp_version: String,
    pub mtv_version: String,
    pub iib: String,
}

pub struct IibLookup {
    base_url: String,
    http: Client,
}

impl IibLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Newest build of `mtv_version` (e.g. "2.8") for every OCP release that has one.
    pub async fn latest(&self, mtv_version: &str) -> Result<Vec<IibBuild>, LookupError> {
        let body: Value = self
            .http
            .get(format!("{}/raw", self.base_url))
            .query(&[("topic", INDEX_BUILT_TOPIC), ("contains", BUNDLE_FILTER)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        latest_builds(&body, mtv_version)
    }
}

fn latest_builds(body: &Value, mtv_version: &str) -> Result<Vec<IibBuild>, LookupError> {
    let messages = body["raw_messages"]
        .as_array()
        .ok_or_else(|| LookupError::Malformed("missing raw_messages".to_string()))?;

    let mut newest: BTreeMap<String, (BundleVersion, IibBuild)> = BTreeMap::new();
    for raw in messages {
        let Some(build) = build_of(raw) else {
            debug!("Skipping index message without bundle/ocp/index fields");
            continue;
        };
        if !belongs_to(&build.mtv_version, mtv_version) {
            continue;
        }
        let Some(version) = BundleVersion::parse(&build.mtv_version) else {
            debug!("Skipping unparseable bundle version {}", build.mtv_version);
            continue;
        };
        match newest.get(&build.ocp_version) {
            Some((seen, _)) if *seen >= version => {}
            _ => {
                newest.insert(build.ocp_version.clone(), (version, build));
            }
        }
    }
    Ok(newest.into_values().map(|(_, build)| build).collect())
}

fn build_of(raw: &Value) -> Option<IibBuild> {
    let index = &raw["msg"]["index"];
    let tag = |s: &str| s.rsplit_once(':').map_or(s, |(_, t)| t).to_string();
    Some(IibBuild {
        ocp_version: index["ocp_version"].as_str()?.to_string(),
        mtv_version: tag(index["added_bundle_images"].get(0)?.as_str()?),
        iib: tag(index["index_image"].as_str()?),
    })
}

/// "2.8" matches "2.8", "2.8.3" and "2.8.3-12", never "2.80.1".
fn belongs_to(bundle: &str, wanted: &str) -> bool {
    bundle == wanted
        || bundle
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('-'))
}

/// Semver-style ordering: numeric core, then a release above any of its pre-releases.
#[derive(Debug, PartialEq, Eq)]
struct BundleVersion {
    core: Vec<u64>,
    pre: Vec<String>,
}

impl BundleVersion {
    fn parse(s: &str) -> Option<Self> {
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, pre.split('.').map(str::to_string).collect()),
            None => (s, Vec::new()),
        };
        let core = core.split('.').map(|p| p.parse().ok()).collect::<Option<Vec<u64>>>()?;
        Some(Self { core, pre })
    }
}

impl Ord for BundleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core.cmp(&other.core).then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                for (a, b) in self.pre.iter().zip(&other.pre) {
                    let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(x), Ok(y)) => x.cmp(&y),
                        (Ok(_), Err(_)) => Ordering::Less,
                        (Err(_), Ok(_)) => Ordering::Greater,
                        (Err(_), Err(_)) => a.cmp(b),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                self.pre.len().cmp(&other.pre.len())
            }
        })
    }
}

impl PartialOrd for BundleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
