use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

fn parse_secs(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("expected whole seconds: {e}"))
}

#[derive(Parser, Debug)]
#[command(name = "mtv-dev", version, about = "Browse MTV test clusters and source providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Interactive console (default)
    Tui,
    /// Probe every cluster once and print the result
    ListClusters {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Print the kubeadmin password of a cluster and copy it to the clipboard
    ClusterPassword {
        name: String,
        /// Do not copy the password to the clipboard
        #[arg(long)]
        no_copy: bool,
    },
    /// Show a cluster's login command and versions, copying the command
    ClusterLogin {
        name: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
        /// Do not copy the login command to the clipboard
        #[arg(long)]
        no_copy: bool,
    },
    /// Latest MTV bundle and IIB per OCP release for an MTV version such as 2.8
    GetIib {
        mtv_version: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// List VMs of one or all configured source providers
    GetVms {
        provider: Option<String>,
        /// Only powered-on VMs
        #[arg(long)]
        running: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
        /// Print the configured providers instead of their VMs
        #[arg(long)]
        list_providers: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Simple,
}

/// Runtime settings. Every option can also come from the environment or a `.env` file.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding one sub-directory per cluster
    #[arg(long, env = "MTV_CLUSTERS_PATH", default_value = "/mnt/cnv-qe.rhcloud.com", global = true)]
    pub clusters_root: PathBuf,

    #[arg(
        long = "cluster-prefix",
        env = "MTV_CLUSTER_PREFIXES",
        value_delimiter = ',',
        default_values_t = ["qemtv-".to_string(), "qemtvd-".to_string()],
        global = true
    )]
    pub cluster_prefixes: Vec<String>,

    #[arg(long, env = "MTV_CLUSTER_DOMAIN", default_value = "rhos-psi.cnv-qe.rhood.us", global = true)]
    pub cluster_domain: String,

    /// Seconds a cluster round may take
    #[arg(long, env = "MTV_CLUSTER_TIMEOUT", default_value = "60", value_parser = parse_secs, global = true)]
    pub cluster_timeout: Duration,

    /// Seconds a provider round may take
    #[arg(long, env = "MTV_PROVIDER_TIMEOUT", default_value = "30", value_parser = parse_secs, global = true)]
    pub provider_timeout: Duration,

    /// Seconds a notification stays on screen
    #[arg(long, env = "MTV_NOTIFICATION_TTL", default_value = "3", value_parser = parse_secs, global = true)]
    pub notification_ttl: Duration,

    #[arg(
        long,
        env = "MTV_DATAGREPPER_URL",
        default_value = "https://datagrepper.engineering.redhat.com",
        global = true
    )]
    pub datagrepper_url: String,

    /// Path to the test project's tests/tests_config/config.py
    #[arg(long, env = "MTV_CONFIG_PATH", global = true)]
    pub provider_config: Option<PathBuf>,

    /// Write debug logs to the log file
    #[arg(long, env = "MTV_DEV_DEBUG", global = true)]
    pub debug: bool,

    #[arg(long, env = "MTV_DEV_LOG_FILE", default_value = "mtv_dev.log", global = true)]
    pub log_file: PathBuf,
}

impl Cli {
    /// Loads `.env` (if any) before clap reads the environment.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Cli::parse()
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Tui)
    }
}
