//! The process controller: a staged copy of the controller script and the machinery to run its
//! `start`, `stop` and `status` actions for one node.

use std::{
    fmt::Display,
    fs::{self, OpenOptions, create_dir_all},
    ops::ControlFlow,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context as _, Result};
use regtest_common::polling::{PollingWaitBehavior, poll};
use regtest_config::{BootstrapOptions, ConfigurationRecord};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// The controller script shipped with this crate.
pub const BITCOIND_MANAGER_SCRIPT: &str = include_str!("../scripts/bitcoind_manager.sh");

/// The marker the `status` action prints for a live node.
///
/// Matching free-form output is fragile, but it is the contract the controller script speaks.
/// Output without the marker is read as "not running", never as an error.
pub const RUNNING_MARKER: &str = "is running";

/// An action understood by the controller script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerAction {
    Start,
    Stop,
    Status,
}

impl ControllerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        }
    }

    /// How long the action may run before the controller gives up on it. The start budget
    /// covers the script's own readiness wait; the stop budget covers its full escalation.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Start => Duration::from_secs(120),
            Self::Stop => Duration::from_secs(90),
            Self::Status => Duration::from_secs(15),
        }
    }
}

impl Display for ControllerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished controller action reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerOutcome {
    pub action: ControllerAction,
    pub exit_code: Option<i32>,
    /// The combined stdout and stderr of the action.
    pub output: String,
}

impl ControllerOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn reports_running(&self) -> bool {
        self.output.contains(RUNNING_MARKER)
    }

    /// The output, or a description of the exit when the script printed nothing.
    pub fn diagnostic(&self) -> String {
        let output = self.output.trim();
        if !output.is_empty() {
            return output.to_string();
        }
        match self.exit_code {
            Some(code) => format!("controller `{}` exited with code {code}", self.action),
            None => format!("controller `{}` was terminated by a signal", self.action),
        }
    }
}

/// The staged controller resources of one node.
///
/// Staging happens exactly once, when the controller is created. [`ProcessController::release`]
/// removes the staging directory; dropping the controller does the same.
#[derive(Debug)]
pub struct ProcessController {
    staging_directory: Option<TempDir>,
    script_path: PathBuf,
    logs_directory: PathBuf,
    shell: PathBuf,
}

impl ProcessController {
    const SCRIPT_FILE: &str = "bitcoind_manager.sh";
    const LOGS_DIRECTORY: &str = "logs";
    const STAGING_PREFIX: &str = "regtest-";

    const CHILD_POLLING_INTERVAL: Duration = Duration::from_millis(20);

    /// Stages the controller script in a fresh temporary directory: the script named by the
    /// options when there is one, the embedded script otherwise.
    #[instrument(level = "debug", skip_all)]
    pub fn stage(options: &BootstrapOptions, shell: PathBuf) -> Result<Self> {
        let staging_directory = tempfile::Builder::new()
            .prefix(Self::STAGING_PREFIX)
            .tempdir()
            .context("Failed to create temp directory for the controller script")?;

        let script_path = staging_directory.path().join(Self::SCRIPT_FILE);
        match options.controller_script.as_ref() {
            Some(source) => {
                fs::copy(source, &script_path).with_context(|| {
                    format!("Failed to copy the controller script {}", source.display())
                })?;
            }
            None => fs::write(&script_path, BITCOIND_MANAGER_SCRIPT)
                .context("Failed to write the bitcoind manager script")?,
        }

        let logs_directory = staging_directory.path().join(Self::LOGS_DIRECTORY);
        create_dir_all(&logs_directory)
            .context("Failed to create the controller logs directory")?;

        debug!(script = %script_path.display(), "Staged the controller script");

        Ok(Self {
            staging_directory: Some(staging_directory),
            script_path,
            logs_directory,
            shell,
        })
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.staging_directory
            .as_ref()
            .map(|_| self.script_path.as_path())
    }

    pub fn is_released(&self) -> bool {
        self.staging_directory.is_none()
    }

    /// Removes the staging directory. Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if let Some(staging_directory) = self.staging_directory.take() {
            let path = staging_directory.path().to_path_buf();
            staging_directory.close().with_context(|| {
                format!("Failed to remove the staging directory {}", path.display())
            })?;
            debug!(path = %path.display(), "Released the controller staging directory");
        }
        Ok(())
    }

    /// Runs one controller action to completion as
    /// `<action> <datadir> <port> <user> <pass> [extra args]`.
    ///
    /// Returns `Err` only when the action could not run to completion. That covers an invalid
    /// configured port, a script that could not be spawned, an action that exceeded its timeout
    /// and a cancelled token. In the last two cases the script is killed and reaped before
    /// returning. A script that ran and exited non-zero is an `Ok` outcome whose
    /// [`ControllerOutcome::success`] is `false`.
    #[instrument(
        level = "debug",
        skip_all,
        fields(action = %action),
        err(Display)
    )]
    pub fn run(
        &self,
        action: ControllerAction,
        config: &ConfigurationRecord,
        cancellation: &CancellationToken,
    ) -> Result<ControllerOutcome> {
        anyhow::ensure!(
            !self.is_released(),
            "The controller resources have been released"
        );
        let port = config.port()?;

        let log_path = self.logs_directory.join(format!("{action}.log"));
        let log_file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&log_path)
            .context("Failed to open the controller log file")?;

        let mut command = Command::new(&self.shell);
        command
            .arg(&self.script_path)
            .arg(action.as_str())
            .arg(config.data_directory())
            .arg(port.to_string())
            .arg(&config.user)
            .arg(&config.pass)
            .stdin(Stdio::null())
            .stdout(
                log_file
                    .try_clone()
                    .context("Failed to clone the controller log file")?,
            )
            .stderr(log_file);
        if action == ControllerAction::Start {
            command.args(&config.extra_args);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn the controller script for `{action}`"))?;

        let status: Result<ExitStatus> = poll(
            action.timeout(),
            PollingWaitBehavior::Constant(Self::CHILD_POLLING_INTERVAL),
            cancellation,
            || match child.try_wait() {
                Ok(Some(status)) => Ok(ControlFlow::Break(status)),
                Ok(None) => Ok(ControlFlow::Continue(())),
                Err(error) => Err(error.into()),
            },
        );
        let status = match status {
            Ok(status) => status,
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(error.context(format!(
                    "The controller action `{action}` did not run to completion"
                )));
            }
        };

        let output = fs::read(&log_path).context("Failed to read the controller log file")?;
        let outcome = ControllerOutcome {
            action,
            exit_code: status.code(),
            output: String::from_utf8_lossy(&output).into_owned(),
        };
        debug!(exit_code = ?outcome.exit_code, "Controller action finished");
        Ok(outcome)
    }
}
