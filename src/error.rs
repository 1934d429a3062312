use thiserror::Error;

/// A round could not be started at all: there is nothing to dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("cannot enumerate clusters in {path}: {reason}")]
    Enumerate { path: String, reason: String },
    #[error("failed to load provider configurations: {0}")]
    ProviderConfig(String),
    #[error("no supported providers found (vmware, ovirt, openstack)")]
    NoProviders,
}

/// A single target's connect/fetch call failed. Recorded in the round's outcome, never raised.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("login failed for {target}: {reason}")]
    Login { target: String, reason: String },
    #[error("cluster info failed for {target}: {reason}")]
    Info { target: String, reason: String },
    #[error("password unavailable for {target}: {reason}")]
    Secret { target: String, reason: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported provider type: {0}")]
    Unsupported(String),
    #[error("not connected to {0}")]
    NotConnected(&'static str),
    #[error("failed to connect to {kind}: {reason}")]
    Connect { kind: &'static str, reason: String },
    #[error("failed to list VMs: {0}")]
    List(String),
    #[error("VM '{0}' not found")]
    VmNotFound(String),
    #[error("provider '{0}' not found")]
    UnknownProvider(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find the provider config file; searched {searched}. Set MTV_CONFIG_PATH to point at it")]
    NotFound { searched: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected datagrepper response: {0}")]
    Malformed(String),
}
