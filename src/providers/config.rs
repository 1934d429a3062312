//! Reads source provider definitions out of the test project's Python config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::ProviderConfig;
use crate::error::ConfigError;

const CONFIG_RELATIVE: [&str; 3] = ["tests", "tests_config", "config.py"];
const PROJECT_MARKERS: [&str; 4] = [
    "libs/base_provider.py",
    "utilities/mtv_migration.py",
    "conftest.py",
    "OWNERS",
];
const CONFIG_INDICATORS: [&str; 4] = ["source_providers_dict", "vsphere", "ovirt", "openstack"];

struct Patterns {
    provider_key: Regex,
    field: Regex,
    closing: Regex,
}

impl Patterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            provider_key: Regex::new(r#"^\s*"([^"]+)":\s*\{"#)?,
            field: Regex::new(r#"^\s*"([a-z_]+)":\s*"([^"]*)",?"#)?,
            closing: Regex::new(r"^\s*\},?\s*$")?,
        })
    }
}

fn config_in(dir: &Path) -> PathBuf {
    CONFIG_RELATIVE.iter().fold(dir.to_path_buf(), |p, c| p.join(c))
}

/// At least two of the provider indicators appear in the file.
pub fn is_valid_config(path: &Path) -> bool {
    let Ok(source) = std::fs::read_to_string(path) else {
        return false;
    };
    CONFIG_INDICATORS
        .iter()
        .filter(|indicator| source.contains(*indicator))
        .count()
        >= 2
}

fn is_project_root(dir: &Path) -> bool {
    PROJECT_MARKERS
        .iter()
        .filter(|marker| dir.join(marker).exists())
        .count()
        >= 2
}

/// Finds the config file: an explicit path wins, then the first project root
/// found walking up from each start directory, then the usual relative spots.
pub fn locate_from(explicit: Option<&Path>, starts: &[PathBuf]) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        debug!("Explicit provider config {} does not exist", path.display());
    }

    for start in starts {
        for dir in start.ancestors() {
            let candidate = config_in(dir);
            if is_project_root(dir) && candidate.is_file() && is_valid_config(&candidate) {
                return Ok(candidate);
            }
        }
        for rel in ["..", "../.."] {
            let candidate = config_in(&start.join(rel));
            if candidate.is_file() && is_valid_config(&candidate) {
                return Ok(candidate);
            }
        }
    }

    let mut searched: Vec<String> = starts.iter().map(|s| s.display().to_string()).collect();
    if let Some(path) = explicit {
        searched.insert(0, path.display().to_string());
    }
    Err(ConfigError::NotFound {
        searched: searched.join(", "),
    })
}

/// Searches from the working directory and the executable's directory.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let mut starts = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        starts.push(cwd);
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        starts.push(dir);
    }
    locate_from(explicit, &starts)
}

pub fn load(path: &Path) -> Result<BTreeMap<String, ProviderConfig>, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse(&source)
}

fn finish(
    configs: &mut BTreeMap<String, ProviderConfig>,
    current: Option<(String, ProviderConfig)>,
) {
    let Some((name, cfg)) = current else {
        return;
    };
    match cfg.provider_type.as_str() {
        "" | "ova" | "openshift" => debug!("Ignoring provider entry {name}"),
        _ => {
            configs.insert(name, cfg);
        }
    }
}

/// Line-oriented scan of the `source_providers_dict` literal.
pub fn parse(source: &str) -> Result<BTreeMap<String, ProviderConfig>, ConfigError> {
    let patterns = Patterns::new()?;
    let mut configs = BTreeMap::new();
    let mut current: Option<(String, ProviderConfig)> = None;
    let mut inside = false;
    let mut depth: i32 = 0;

    for line in source.lines() {
        if !inside {
            if line.contains("source_providers_dict") && line.contains('{') {
                inside = true;
                depth = 1;
            }
            continue;
        }

        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
        if depth <= 0 {
            finish(&mut configs, current.take());
            break;
        }

        if let Some(caps) = patterns.provider_key.captures(line) {
            finish(&mut configs, current.take());
            let cfg = ProviderConfig {
                insecure: true,
                ..Default::default()
            };
            current = Some((caps[1].to_string(), cfg));
            continue;
        }

        if patterns.closing.is_match(line) && depth == 1 {
            finish(&mut configs, current.take());
            continue;
        }

        let Some((_, cfg)) = current.as_mut() else {
            continue;
        };
        let Some(caps) = patterns.field.captures(line) else {
            continue;
        };
        let value = caps[2].to_string();
        match &caps[1] {
            "type" => {
                cfg.provider_type = if value == "vsphere" {
                    "vmware".to_string()
                } else {
                    value
                }
            }
            "api_url" => cfg.url = value,
            "username" => cfg.username = value,
            "password" => cfg.password = value,
            "project_name" => {
                cfg.extra.insert("tenant_name".to_string(), value);
            }
            "region_name" => {
                cfg.extra.insert("region".to_string(), value);
            }
            key @ ("user_domain_name" | "user_domain_id" | "project_domain_id") => {
                cfg.extra.insert(key.to_string(), value);
            }
            _ => {}
        }
    }

    Ok(configs)
}
