//! The bitcoind regtest node implementation.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use anyhow::Context as _;
use regtest_common::{fs::reclaim_directory, polling::is_cancelled};
use regtest_config::{
    BootstrapOptions, ConfigurationRecord, DataDirectoryPolicy, RpcConnectionConfig,
};
use regtest_node_interaction::RpcSession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    Error, Node,
    controller::{ControllerAction, ProcessController},
    readiness::ReadinessProbe,
};

static NODE_COUNT: AtomicU32 = AtomicU32::new(0);

/// The lifecycle states of a [`BitcoindNode`].
///
/// `Starting` and `Stopping` only exist while the lifecycle lock is held; every operation
/// returns with the node either `Ready`, `Running` or `Disposed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Ready,
    Starting,
    Running,
    Stopping,
    Disposed,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
            Self::Disposed => f.write_str("disposed"),
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: NodeState,
    controller: Option<ProcessController>,
    /// Set when the last stop of the process failed, so the process may still be alive.
    stop_pending: bool,
}

/// A bitcoind regtest instance driven through the controller script.
///
/// Every instance owns its configuration, its staged controller and its own lifecycle lock, so
/// instances with disjoint ports and data directories can be started and stopped concurrently.
/// Start, stop and status calls on the same instance are serialized.
///
/// With the default [`DataDirectoryPolicy::Remove`] the data directory is deleted after every
/// successful stop, so each start begins from the genesis block.
///
/// Disposes itself on drop, stopping the node first if it is still running.
#[derive(Debug)]
pub struct BitcoindNode {
    id: u32,
    config: ConfigurationRecord,
    port: u16,
    node_binary: PathBuf,
    readiness: ReadinessProbe,
    lifecycle: Mutex<Lifecycle>,
    session: RwLock<Option<Arc<RpcSession>>>,
}

impl BitcoindNode {
    const SHELL: &str = "bash";

    /// Creates a node from the configuration, or from [`ConfigurationRecord::default`] when none
    /// is given, using the embedded controller script.
    pub fn new(config: impl Into<Option<ConfigurationRecord>>) -> Result<Self, Error> {
        Self::with_bootstrap(config, BootstrapOptions::default())
    }

    /// Creates a node after validating the configured port, checking that the node binary is
    /// installed and staging the controller script. No node is returned when any step fails.
    #[instrument(level = "info", skip_all, err)]
    pub fn with_bootstrap(
        config: impl Into<Option<ConfigurationRecord>>,
        options: BootstrapOptions,
    ) -> Result<Self, Error> {
        let config = config.into().unwrap_or_default();
        let port = config.port()?;

        let node_binary =
            which::which(&options.node_binary).map_err(|_| Error::DependencyMissing {
                binary: options.node_binary.clone(),
            })?;
        let shell = which::which(Self::SHELL).map_err(|_| Error::DependencyMissing {
            binary: Self::SHELL.to_string(),
        })?;

        let controller = ProcessController::stage(&options, shell)
            .map_err(|error| Error::EnvironmentSetupFailed(format!("{error:#}")))?;

        let id = NODE_COUNT.fetch_add(1, Ordering::SeqCst);
        info!(
            node_id = id,
            host = %config.host,
            data_directory = %config.data_directory().display(),
            "Created bitcoind node"
        );

        Ok(Self {
            id,
            config,
            port,
            node_binary,
            readiness: ReadinessProbe::default(),
            lifecycle: Mutex::new(Lifecycle {
                state: NodeState::Ready,
                controller: Some(controller),
                stop_pending: false,
            }),
            session: RwLock::new(None),
        })
    }

    /// Replaces the probe used to wait for the RPC endpoint after the controller started the
    /// node. The default probe polls for 10 s at 200 ms intervals.
    pub fn with_readiness_probe(mut self, readiness: ReadinessProbe) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns a copy of the configuration. Changing it has no effect on the node.
    pub fn config(&self) -> ConfigurationRecord {
        self.config.clone()
    }

    pub fn rpc_config(&self) -> RpcConnectionConfig {
        RpcConnectionConfig::from(&self.config)
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle().state
    }

    /// The location of the staged controller script, or `None` once the node is disposed.
    pub fn controller_script(&self) -> Option<PathBuf> {
        self.lifecycle()
            .controller
            .as_ref()
            .and_then(|controller| controller.script_path().map(Path::to_path_buf))
    }

    /// The live RPC session. Only present while the node is running.
    pub fn session(&self) -> Option<Arc<RpcSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn start(&self) -> Result<(), Error> {
        self.start_with_cancellation(&CancellationToken::new())
    }

    /// Starts the node and blocks until its RPC endpoint answers.
    ///
    /// Starting a running node is a no-op. On any failure the node is left `Ready` and a
    /// best-effort stop is issued so no process is left behind.
    #[instrument(
        level = "info",
        skip_all,
        fields(node_id = self.id, port = self.port),
        err
    )]
    pub fn start_with_cancellation(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        let mut guard = self.lifecycle();
        let lifecycle = &mut *guard;

        match lifecycle.state {
            NodeState::Disposed => return Err(Error::Disposed),
            NodeState::Running => {
                debug!("Node is already running");
                return Ok(());
            }
            _ => {}
        }
        let Some(controller) = lifecycle.controller.as_ref() else {
            return Err(Error::Disposed);
        };

        lifecycle.state = NodeState::Starting;
        let result = self.launch(controller, cancellation);
        match result {
            Ok(session) => {
                *self.session_slot() = Some(Arc::new(session));
                lifecycle.state = NodeState::Running;
                info!(connection_string = %self.config.rpc_url(), "Node is running");
                Ok(())
            }
            Err(error) => {
                lifecycle.stop_pending = !self.abandon(controller);
                lifecycle.state = NodeState::Ready;
                Err(error)
            }
        }
    }

    pub fn stop(&self) -> Result<(), Error> {
        self.stop_with_cancellation(&CancellationToken::new())
    }

    /// Stops the node: the session is closed first, then the controller escalates from an RPC
    /// stop to signals. Once the stop succeeded the data directory is handled according to the
    /// configured [`DataDirectoryPolicy`].
    ///
    /// The controller's stop action runs even when the node is `Ready`, so a process left behind
    /// by an earlier failed stop is still reached; the script treats a dead node as stopped.
    /// Stopping a disposed node is a no-op. The node is `Ready` after every stop attempt, failed
    /// or not.
    #[instrument(
        level = "info",
        skip_all,
        fields(node_id = self.id, port = self.port),
        err
    )]
    pub fn stop_with_cancellation(&self, cancellation: &CancellationToken) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle();
        self.stop_locked(&mut lifecycle, cancellation)
    }

    pub fn is_running(&self) -> Result<bool, Error> {
        self.is_running_with_cancellation(&CancellationToken::new())
    }

    /// Asks the controller whether the node process is alive.
    ///
    /// Controller output without the running marker counts as not running. When the node was
    /// believed to be running but is not, its session is closed and the node becomes `Ready`.
    #[instrument(
        level = "info",
        skip_all,
        fields(node_id = self.id, port = self.port),
        err
    )]
    pub fn is_running_with_cancellation(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<bool, Error> {
        let mut guard = self.lifecycle();
        let lifecycle = &mut *guard;

        let Some(controller) = lifecycle.controller.as_ref() else {
            return Err(Error::Disposed);
        };

        let outcome = controller
            .run(ControllerAction::Status, &self.config, cancellation)
            .map_err(|error| Error::StatusCheckFailed {
                output: format!("{error:#}"),
            })?;
        if !outcome.success() {
            return Err(Error::StatusCheckFailed {
                output: outcome.diagnostic(),
            });
        }

        let running = outcome.reports_running();
        if !running && lifecycle.state == NodeState::Running {
            warn!("Node exited without being stopped");
            self.close_session();
            lifecycle.state = NodeState::Ready;
        }
        Ok(running)
    }

    /// Stops the node if it is running, or if its last stop failed, and releases the staged
    /// controller resources. Every later operation except `stop` and `dispose` fails with
    /// [`Error::Disposed`].
    ///
    /// Disposing twice is a no-op.
    #[instrument(level = "info", skip_all, fields(node_id = self.id), err)]
    pub fn dispose(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == NodeState::Disposed {
            return Ok(());
        }

        let stopped = if lifecycle.state == NodeState::Ready && !lifecycle.stop_pending {
            Ok(())
        } else {
            self.stop_locked(&mut lifecycle, &CancellationToken::new())
        };
        if let Err(error) = &stopped {
            warn!(%error, "Failed to stop the node while disposing it");
        }

        lifecycle.state = NodeState::Disposed;
        if let Some(mut controller) = lifecycle.controller.take() {
            controller
                .release()
                .map_err(|error| Error::CleanupFailed(format!("{error:#}")))?;
        }
        info!("Disposed node");

        stopped
    }

    /// Returns the first line of `<node binary> --version`.
    #[instrument(level = "info", skip_all, fields(node_id = self.id))]
    pub fn version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.node_binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .context("Failed to run the node binary with --version")?;
        anyhow::ensure!(
            output.status.success(),
            "The node binary exited with {} when asked for its version",
            output.status
        );

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .context("The node binary printed no version")
    }

    /// Runs the controller's start action and waits for the RPC endpoint.
    fn launch(
        &self,
        controller: &ProcessController,
        cancellation: &CancellationToken,
    ) -> Result<RpcSession, Error> {
        let outcome = match controller.run(ControllerAction::Start, &self.config, cancellation) {
            Ok(outcome) => outcome,
            Err(error) if is_cancelled(&error) => return Err(Error::StartCancelled),
            Err(error) => {
                return Err(Error::StartFailed {
                    output: format!("{error:#}"),
                });
            }
        };
        if !outcome.success() {
            error!(exit_code = ?outcome.exit_code, "Controller failed to start the node");
            return Err(Error::StartFailed {
                output: outcome.diagnostic(),
            });
        }
        debug!(output = %outcome.output.trim(), "Controller started the node");

        let endpoint = self.config.rpc_url();
        let session = RpcSession::connect(self.rpc_config()).map_err(|error| {
            Error::SessionEstablishFailed {
                endpoint: endpoint.clone(),
                reason: error.to_string(),
            }
        })?;
        match self.readiness.wait_until_ready(&session, cancellation) {
            Ok(_) => Ok(session),
            Err(error) if is_cancelled(&error) => Err(Error::StartCancelled),
            Err(error) => Err(Error::SessionEstablishFailed {
                endpoint,
                reason: format!("{error:#}"),
            }),
        }
    }

    /// Best-effort stop after a failed start. Runs to completion even when the start itself was
    /// cancelled, and never touches the data directory. Returns whether the stop succeeded.
    fn abandon(&self, controller: &ProcessController) -> bool {
        match controller.run(ControllerAction::Stop, &self.config, &CancellationToken::new()) {
            Ok(outcome) if outcome.success() => {
                debug!("Cleaned up after the failed start");
                true
            }
            Ok(outcome) => {
                warn!(
                    output = %outcome.diagnostic(),
                    "Failed to clean up after the failed start"
                );
                false
            }
            Err(error) => {
                warn!(%error, "Failed to clean up after the failed start");
                false
            }
        }
    }

    fn stop_locked(
        &self,
        lifecycle: &mut Lifecycle,
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        if lifecycle.state == NodeState::Disposed {
            debug!("Node is disposed, nothing to stop");
            return Ok(());
        }
        let Some(controller) = lifecycle.controller.as_ref() else {
            lifecycle.state = NodeState::Ready;
            return Ok(());
        };

        lifecycle.state = NodeState::Stopping;
        self.close_session();

        let result = controller.run(ControllerAction::Stop, &self.config, cancellation);
        lifecycle.state = NodeState::Ready;
        lifecycle.stop_pending = !matches!(&result, Ok(outcome) if outcome.success());

        let outcome = result.map_err(|error| Error::StopFailed {
            output: format!("{error:#}"),
        })?;
        if !outcome.success() {
            error!(exit_code = ?outcome.exit_code, "Controller failed to stop the node");
            return Err(Error::StopFailed {
                output: outcome.diagnostic(),
            });
        }
        info!("Node stopped");

        self.reclaim_data_directory()
    }

    fn reclaim_data_directory(&self) -> Result<(), Error> {
        match self.config.data_directory_policy {
            DataDirectoryPolicy::Preserve => Ok(()),
            DataDirectoryPolicy::Remove => reclaim_directory(self.config.data_directory())
                .map(|removed| {
                    if removed {
                        info!(
                            data_directory = %self.config.data_directory().display(),
                            "Removed the data directory"
                        );
                    }
                })
                .map_err(|error| Error::StopFailed {
                    output: format!("{error:#}"),
                }),
        }
    }

    fn close_session(&self) {
        if let Some(session) = self.session_slot().take() {
            session.close();
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<RpcSession>>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Node for BitcoindNode {
    fn id(&self) -> u32 {
        self.id
    }

    fn connection_string(&self) -> String {
        self.config.rpc_url()
    }

    fn start(&self) -> Result<(), Error> {
        BitcoindNode::start(self)
    }

    fn stop(&self) -> Result<(), Error> {
        BitcoindNode::stop(self)
    }

    fn is_running(&self) -> Result<bool, Error> {
        BitcoindNode::is_running(self)
    }

    fn session(&self) -> Option<Arc<RpcSession>> {
        BitcoindNode::session(self)
    }

    fn dispose(&self) -> Result<(), Error> {
        BitcoindNode::dispose(self)
    }

    fn version(&self) -> anyhow::Result<String> {
        BitcoindNode::version(self)
    }
}

impl Drop for BitcoindNode {
    #[instrument(level = "info", skip_all, fields(node_id = self.id))]
    fn drop(&mut self) {
        if let Err(error) = self.dispose() {
            error!(%error, "Failed to dispose of the node");
        }
    }
}
