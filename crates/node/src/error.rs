//! Error types for the regtest-node crate.

use thiserror::Error;

/// The errors surfaced by node construction and lifecycle operations.
///
/// Construction errors are fatal: no node is returned. Every lifecycle error leaves the node in
/// a well-defined state, documented per variant, from which the caller may retry.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration cannot describe a node, e.g. its host has a malformed port.
    #[error("invalid node configuration: {0}")]
    InvalidConfiguration(#[from] regtest_config::InvalidPort),

    /// A required binary could not be resolved on `PATH`.
    #[error("{binary} not found in PATH - please install Bitcoin Core (brew install bitcoin / apt-get install bitcoind)")]
    DependencyMissing { binary: String },

    /// The controller script could not be staged.
    #[error("failed to set up the node environment: {0}")]
    EnvironmentSetupFailed(String),

    /// The controller could not start the node. The node is left `Ready`.
    #[error("failed to start bitcoind: {output}")]
    StartFailed { output: String },

    /// The start was cancelled. The node is left `Ready`.
    #[error("start cancelled")]
    StartCancelled,

    /// The node process started but its RPC endpoint never became reachable. The node is left
    /// `Ready`.
    #[error("failed to establish an rpc session with {endpoint}: {reason}")]
    SessionEstablishFailed { endpoint: String, reason: String },

    /// The stop did not complete cleanly. The node is left `Ready` regardless.
    #[error("failed to stop bitcoind: {output}")]
    StopFailed { output: String },

    /// The status action itself could not run. Says nothing about the node process.
    #[error("failed to check bitcoind status: {output}")]
    StatusCheckFailed { output: String },

    /// Removing the staged controller resources failed.
    #[error("failed to clean up the staging directory: {0}")]
    CleanupFailed(String),

    /// The node has been disposed and can no longer be used.
    #[error("the node has been disposed")]
    Disposed,
}
