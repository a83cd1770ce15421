//! The configuration records shared by every regtest harness crate.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// The RPC port bitcoind listens on in regtest mode when nothing else is configured.
pub const DEFAULT_RPC_PORT: u16 = 18443;

/// The connection and storage parameters of a single regtest node instance.
///
/// A node instance keeps its own copy of this record, so cloning is the only way to hand one
/// out. Every field (the extra arguments included) is owned, which makes a clone fully
/// independent of the original.
#[derive(Debug, Parser, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(name = "regtest")]
#[serde(default)]
pub struct ConfigurationRecord {
    /// The `host:port` address of the node's JSON-RPC endpoint.
    #[arg(long = "rpc-host", default_value = "127.0.0.1:18443")]
    pub host: String,

    /// The username used to authenticate against the RPC endpoint.
    #[arg(long = "rpc-user", default_value = "user")]
    pub user: String,

    /// The password used to authenticate against the RPC endpoint.
    #[arg(long = "rpc-pass", default_value = "pass")]
    pub pass: String,

    /// The directory bitcoind stores its chain state in.
    #[arg(long = "datadir", default_value = "./bitcoind_regtest")]
    pub data_directory: PathBuf,

    /// Additional arguments handed to bitcoind on start, e.g. `-txindex=1`.
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// What happens to the data directory once the node has been stopped.
    #[arg(long = "datadir-policy", default_value = "remove")]
    pub data_directory_policy: DataDirectoryPolicy,
}

impl ConfigurationRecord {
    /// Returns the RPC port of the configured endpoint.
    ///
    /// A host without a port segment (`127.0.0.1`, `[::1]`) uses [`DEFAULT_RPC_PORT`], the port
    /// bitcoind listens on without `-rpcport`. A port segment that is empty, zero or out of range
    /// is an error. IPv6 hosts need brackets.
    pub fn port(&self) -> Result<u16, InvalidPort> {
        if self.host.ends_with(']') {
            return Ok(DEFAULT_RPC_PORT);
        }
        let Some((_, segment)) = self.host.rsplit_once(':') else {
            return Ok(DEFAULT_RPC_PORT);
        };
        match segment.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(InvalidPort {
                host: self.host.clone(),
                segment: segment.to_string(),
            }),
        }
    }

    /// The URL JSON-RPC requests are posted to.
    pub fn rpc_url(&self) -> String {
        format!("http://{}/", self.host)
    }

    pub fn data_directory(&self) -> &Path {
        self.data_directory.as_path()
    }
}

impl Default for ConfigurationRecord {
    fn default() -> Self {
        ConfigurationRecord::parse_from(["regtest"])
    }
}

/// The port segment of a configured host could not be used as an RPC port.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid rpc host `{host}`: `{segment}` is not a valid port")]
pub struct InvalidPort {
    pub host: String,
    pub segment: String,
}

/// The policy applied to an instance's data directory after a successful stop.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, ValueEnum, Serialize, Deserialize,
)]
#[clap(rename_all = "lower")]
#[serde(rename_all = "lowercase")]
pub enum DataDirectoryPolicy {
    /// Delete the data directory, discarding all chain state. Every start begins from genesis.
    #[default]
    Remove,
    /// Leave the data directory untouched so the next start resumes the same chain.
    Preserve,
}

impl Display for DataDirectoryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remove => f.write_str("remove"),
            Self::Preserve => f.write_str("preserve"),
        }
    }
}

/// Options consumed once, while an instance is being constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    /// The node binary that has to be resolvable on `PATH`.
    pub node_binary: String,

    /// A controller script on disk to stage instead of the one embedded in the node crate.
    pub controller_script: Option<PathBuf>,
}

impl BootstrapOptions {
    pub const DEFAULT_NODE_BINARY: &str = "bitcoind";
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            node_binary: Self::DEFAULT_NODE_BINARY.to_string(),
            controller_script: None,
        }
    }
}

/// The endpoint and credentials a caller needs to open their own RPC client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConnectionConfig {
    pub host: String,
    pub user: String,
    pub pass: String,
}

impl From<&ConfigurationRecord> for RpcConnectionConfig {
    fn from(config: &ConfigurationRecord) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            pass: config.pass.clone(),
        }
    }
}

impl RpcConnectionConfig {
    pub fn rpc_url(&self) -> String {
        format!("http://{}/", self.host)
    }
}
