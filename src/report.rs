//! Plain-text and JSON output for the non-interactive subcommands.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::config::OutputFormat;
use crate::discovery::{AggregationOutcome, Outcome};
use crate::iib::IibBuild;
use crate::model::{ClusterInfo, VmInfo};
use crate::providers::ProviderConfig;

/// Left-aligned columns, two spaces apart.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<width$}", width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = vec![line(headers.to_vec())];
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push(line(rule.iter().map(String::as_str).collect()));
    out.extend(rows.iter().map(|r| line(r.iter().map(String::as_str).collect())));
    out.join("\n") + "\n"
}

fn status_of<I>(outcome: &Outcome<I>) -> (&'static str, Option<&str>) {
    match outcome {
        Outcome::Success(_) => ("Online", None),
        Outcome::Error(e) => ("Offline", Some(e.as_str())),
        Outcome::Timeout => ("Timeout", None),
    }
}

pub fn clusters(outcome: &AggregationOutcome<ClusterInfo>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let items: Vec<Value> = outcome
                .results
                .iter()
                .map(|r| {
                    let (status, error) = status_of(&r.outcome);
                    let mut item = json!({"name": r.target, "status": status});
                    if let Some(e) = error {
                        item["error"] = json!(e);
                    }
                    if let Outcome::Success(info) = &r.outcome {
                        item["ocp_version"] = json!(info.ocp_version);
                        item["mtv_version"] = json!(info.mtv_version);
                        item["cnv_version"] = json!(info.cnv_version);
                        item["iib"] = json!(info.iib);
                        item["api_url"] = json!(info.api_url);
                        item["console_url"] = json!(info.console_url);
                    }
                    item
                })
                .collect();
            pretty(&Value::Array(items))
        }
        OutputFormat::Simple => outcome
            .results
            .iter()
            .map(|r| format!("{} {}\n", r.target, status_of(&r.outcome).0))
            .collect(),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = outcome
                .results
                .iter()
                .map(|r| {
                    let (status, _) = status_of(&r.outcome);
                    match &r.outcome {
                        Outcome::Success(info) => vec![
                            r.target.clone(),
                            status.to_string(),
                            info.ocp_version.clone(),
                            info.mtv_display(),
                            info.cnv_version.clone(),
                        ],
                        _ => vec![r.target.clone(), status.to_string()],
                    }
                })
                .collect();
            table(&["NAME", "STATUS", "OCP", "MTV", "CNV"], &rows)
        }
    }
}

/// Login command plus versions of one cluster. `Simple` prints only the command.
pub fn cluster_login(info: &ClusterInfo, password: &str, format: OutputFormat) -> String {
    let login = info.login_command(password);
    match format {
        OutputFormat::Json => pretty(&json!({
            "name": info.name,
            "api_url": info.api_url,
            "console_url": info.console_url,
            "username": "kubeadmin",
            "password": password,
            "login_command": login,
            "ocp_version": info.ocp_version,
            "mtv_version": info.mtv_version,
            "cnv_version": info.cnv_version,
            "iib": info.iib,
        })),
        OutputFormat::Simple => format!("{login}\n"),
        OutputFormat::Table => {
            let mtv = info.mtv_display();
            let rows: Vec<Vec<String>> = [
                ("Cluster", info.name.as_str()),
                ("API", info.api_url.as_str()),
                ("Console", info.console_url.as_str()),
                ("Username", "kubeadmin"),
                ("Password", password),
                ("OCP", info.ocp_version.as_str()),
                ("MTV", mtv.as_str()),
                ("CNV", info.cnv_version.as_str()),
            ]
            .iter()
            .map(|(k, v)| vec![k.to_string(), v.to_string()])
            .collect();
            table(&["FIELD", "VALUE"], &rows) + &format!("\n{login}\n")
        }
    }
}

pub fn iib(builds: &[IibBuild], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let mut doc = serde_json::Map::new();
            for b in builds {
                doc.insert(b.ocp_version.clone(), json!({"MTV": b.mtv_version, "IIB": b.iib}));
            }
            pretty(&Value::Object(doc))
        }
        OutputFormat::Simple => builds
            .iter()
            .map(|b| format!("{} {} {}\n", b.ocp_version, b.mtv_version, b.iib))
            .collect(),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = builds
                .iter()
                .map(|b| vec![b.ocp_version.clone(), b.mtv_version.clone(), b.iib.clone()])
                .collect();
            table(&["OCP", "MTV", "IIB"], &rows)
        }
    }
}

pub fn providers(configs: &BTreeMap<String, ProviderConfig>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => pretty(&Value::Array(
            configs
                .iter()
                .map(|(name, cfg)| json!({"name": name, "type": cfg.provider_type, "url": cfg.url}))
                .collect(),
        )),
        OutputFormat::Simple => configs.keys().map(|name| format!("{name}\n")).collect(),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = configs
                .iter()
                .map(|(name, cfg)| vec![name.clone(), cfg.provider_type.clone(), cfg.url.clone()])
                .collect();
            table(&["NAME", "TYPE", "URL"], &rows)
        }
    }
}

/// VMs of every provider in the round; failed providers are reported inline.
pub fn vms(outcome: &AggregationOutcome<Vec<VmInfo>>, running_only: bool, format: OutputFormat) -> String {
    let keep = |vm: &&VmInfo| !running_only || vm.is_running();
    match format {
        OutputFormat::Json => {
            let mut doc = serde_json::Map::new();
            for r in &outcome.results {
                let value = match &r.outcome {
                    Outcome::Success(vms) => Value::Array(vms.iter().filter(keep).map(vm_json).collect()),
                    other => json!({"error": status_of(other).1.unwrap_or("timed out")}),
                };
                doc.insert(r.target.clone(), value);
            }
            pretty(&Value::Object(doc))
        }
        OutputFormat::Simple => {
            let mut out = String::new();
            for r in &outcome.results {
                if let Outcome::Success(vms) = &r.outcome {
                    for vm in vms.iter().filter(keep) {
                        out.push_str(&format!("{}/{}\n", r.target, vm.name));
                    }
                }
            }
            out
        }
        OutputFormat::Table => {
            let mut out = String::new();
            for r in &outcome.results {
                out.push_str(&format!("== {} ==\n", r.target));
                match &r.outcome {
                    Outcome::Success(vms) => {
                        let rows: Vec<Vec<String>> = vms
                            .iter()
                            .filter(keep)
                            .map(|vm| {
                                vec![
                                    vm.name.clone(),
                                    vm.power_state.clone(),
                                    vm.cpu.to_string(),
                                    vm.memory_mb.to_string(),
                                    vm.ip_addresses.join(","),
                                ]
                            })
                            .collect();
                        out.push_str(&table(&["NAME", "POWER", "CPU", "MEMORY_MB", "IPS"], &rows));
                    }
                    Outcome::Error(e) => out.push_str(&format!("error: {e}\n")),
                    Outcome::Timeout => out.push_str("error: timed out\n"),
                }
            }
            out
        }
    }
}

fn vm_json(vm: &VmInfo) -> Value {
    json!({
        "name": vm.name,
        "provider": vm.provider,
        "power_state": vm.power_state,
        "uuid": vm.uuid,
        "cpu": vm.cpu,
        "memory_mb": vm.memory_mb,
        "guest_os": vm.guest_os,
        "ip_addresses": vm.ip_addresses,
        "networks": vm.networks,
        "tags": vm.tags,
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()) + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ConnectionResult;
    use std::collections::BTreeSet;

    fn cluster_outcome() -> AggregationOutcome<ClusterInfo> {
        AggregationOutcome {
            results: vec![
                ConnectionResult {
                    target: "qemtv-01".to_string(),
                    outcome: Outcome::Success(ClusterInfo {
                        name: "qemtv-01".to_string(),
                        ocp_version: "4.18.3".to_string(),
                        mtv_version: "2.8.0".to_string(),
                        cnv_version: "4.18.1".to_string(),
                        iib: "N/A".to_string(),
                        ..Default::default()
                    }),
                },
                ConnectionResult {
                    target: "qemtv-02".to_string(),
                    outcome: Outcome::Error("login failed".to_string()),
                },
                ConnectionResult {
                    target: "qemtvd-03".to_string(),
                    outcome: Outcome::Timeout,
                },
            ],
            timed_out: BTreeSet::from(["qemtvd-03".to_string()]),
        }
    }

    #[test]
    fn cluster_table_aligns_columns() {
        let out = clusters(&cluster_outcome(), OutputFormat::Table);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME       STATUS   OCP     MTV    CNV");
        assert!(lines[2].starts_with("qemtv-01   Online   4.18.3  2.8.0"));
        assert_eq!(lines[3], "qemtv-02   Offline");
        assert_eq!(lines[4], "qemtvd-03  Timeout");
    }

    #[test]
    fn cluster_json_and_simple() {
        let out = clusters(&cluster_outcome(), OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["ocp_version"], "4.18.3");
        assert_eq!(parsed[1]["error"], "login failed");
        assert_eq!(parsed[2]["status"], "Timeout");

        assert_eq!(
            clusters(&cluster_outcome(), OutputFormat::Simple),
            "qemtv-01 Online\nqemtv-02 Offline\nqemtvd-03 Timeout\n"
        );
    }

    #[test]
    fn vms_filter_running() {
        let vm = |name: &str, power: &str| VmInfo {
            name: name.to_string(),
            power_state: power.to_string(),
            ..Default::default()
        };
        let outcome = AggregationOutcome {
            results: vec![
                ConnectionResult {
                    target: "ovirt-4.4".to_string(),
                    outcome: Outcome::Error("failed to connect".to_string()),
                },
                ConnectionResult {
                    target: "vsphere-8".to_string(),
                    outcome: Outcome::Success(vec![vm("a", "poweredOn"), vm("b", "poweredOff")]),
                },
            ],
            timed_out: BTreeSet::new(),
        };
        assert_eq!(vms(&outcome, true, OutputFormat::Simple), "vsphere-8/a\n");

        let parsed: Value = serde_json::from_str(&vms(&outcome, false, OutputFormat::Json)).unwrap();
        assert_eq!(parsed["vsphere-8"].as_array().map(Vec::len), Some(2));
        assert_eq!(parsed["ovirt-4.4"]["error"], "failed to connect");

        let table = vms(&outcome, false, OutputFormat::Table);
        assert!(table.contains("== ovirt-4.4 ==\nerror: failed to connect"));
        assert!(table.contains("b     poweredOff"));
    }

    #[test]
    fn cluster_login_shows_command_and_versions() {
        let info = ClusterInfo {
            name: "qemtv-01".to_string(),
            api_url: "https://api.qemtv-01.example:6443".to_string(),
            ocp_version: "4.18.3".to_string(),
            mtv_version: "2.8.0".to_string(),
            iib: "iib-123".to_string(),
            ..Default::default()
        };
        let command = "oc login --insecure-skip-tls-verify=true https://api.qemtv-01.example:6443 -u kubeadmin -p pw";

        assert_eq!(cluster_login(&info, "pw", OutputFormat::Simple), format!("{command}\n"));

        let parsed: Value = serde_json::from_str(&cluster_login(&info, "pw", OutputFormat::Json)).unwrap();
        assert_eq!(parsed["login_command"], command);
        assert_eq!(parsed["password"], "pw");

        let out = cluster_login(&info, "pw", OutputFormat::Table);
        assert!(out.contains("MTV       2.8.0 (iib-123)"));
        assert!(out.ends_with(&format!("\n{command}\n")));
    }

    #[test]
    fn iib_keyed_by_ocp_release() {
        let builds = vec![IibBuild {
            ocp_version: "v4.17".to_string(),
            mtv_version: "2.8.2-7".to_string(),
            iib: "120".to_string(),
        }];
        let parsed: Value = serde_json::from_str(&iib(&builds, OutputFormat::Json)).unwrap();
        assert_eq!(parsed["v4.17"]["IIB"], "120");
        assert_eq!(iib(&builds, OutputFormat::Simple), "v4.17 2.8.2-7 120\n");
        assert!(iib(&[], OutputFormat::Table).starts_with("OCP  MTV  IIB"));
    }
}
