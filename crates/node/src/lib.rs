//! This crate provisions and supervises isolated bitcoind regtest nodes.
//!
//! A [`BitcoindNode`] composes a [`ConfigurationRecord`], a staged controller script that starts,
//! stops and inspects the bitcoind process, and an [`RpcSession`] that only exists while the node
//! is running:
//!
//! ```text
//! Ready -> Starting -> Running -> Stopping -> Ready
//!   \__________________________________________\__> Disposed
//! ```
//!
//! Two behaviors are worth knowing before using this crate:
//!
//! - The data directory is deleted after every successful stop unless the configuration selects
//!   [`DataDirectoryPolicy::Preserve`]. Regtest chains are meant to be thrown away; pointing a
//!   node at a directory holding anything of value will destroy it.
//! - Liveness is decided by looking for the `is running` marker in the output of the
//!   controller's `status` action. Any other output is read as "not running".
//!
//! Nodes never share state. Callers are responsible for giving concurrently running nodes
//! disjoint ports and data directories.
//!
//! [`ConfigurationRecord`]: regtest_config::ConfigurationRecord
//! [`DataDirectoryPolicy::Preserve`]: regtest_config::DataDirectoryPolicy::Preserve
//! [`RpcSession`]: regtest_node_interaction::RpcSession

use std::sync::Arc;

use regtest_node_interaction::RpcSession;

pub mod bitcoind;
pub mod controller;
pub mod error;
pub mod pool;
pub mod readiness;

pub use bitcoind::{BitcoindNode, NodeState};
pub use error::Error;
pub use pool::NodePool;
pub use readiness::ReadinessProbe;

/// An abstract interface for regtest nodes.
pub trait Node {
    fn id(&self) -> u32;

    /// Returns the URL of the node's RPC endpoint.
    fn connection_string(&self) -> String;

    /// Starts the node.
    ///
    /// Blocking until it's ready to accept RPC calls.
    fn start(&self) -> Result<(), Error>;

    /// Stops the node.
    ///
    /// Blocking until it's completely stopped.
    fn stop(&self) -> Result<(), Error>;

    fn is_running(&self) -> Result<bool, Error>;

    /// Returns the live RPC session, if the node is running.
    fn session(&self) -> Option<Arc<RpcSession>>;

    /// Stops the node if needed and releases everything it staged.
    fn dispose(&self) -> Result<(), Error>;

    /// Returns the node version.
    fn version(&self) -> anyhow::Result<String>;
}
