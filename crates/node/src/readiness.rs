//! Waiting for a freshly started node to answer RPC calls.

use std::{ops::ControlFlow, time::Duration};

use anyhow::Result;
use regtest_common::polling::{PollingWaitBehavior, poll};
use regtest_node_interaction::{RpcError, RpcSession};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// bitcoind answers with this code while it is still loading its block index or wallets.
const RPC_IN_WARMUP: i64 = -28;

/// Polls `getblockcount` until the node answers it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessProbe {
    pub polling_duration: Duration,
    pub interval: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            polling_duration: Duration::from_secs(10),
            interval: Duration::from_millis(200),
        }
    }
}

impl ReadinessProbe {
    /// Returns the block count once the node answers.
    ///
    /// Unreachable endpoints and warm-up answers are retried until the polling duration runs
    /// out. Any other RPC failure, e.g. rejected credentials, fails right away since waiting
    /// will not fix it.
    #[instrument(level = "debug", skip_all, err(Display))]
    pub fn wait_until_ready(
        &self,
        session: &RpcSession,
        cancellation: &CancellationToken,
    ) -> Result<u64> {
        poll(
            self.polling_duration,
            PollingWaitBehavior::Constant(self.interval),
            cancellation,
            || match session.get_block_count() {
                Ok(count) => {
                    debug!(block_count = count, "Node answered the readiness probe");
                    Ok(ControlFlow::Break(count))
                }
                Err(RpcError::Transport { .. }) => Ok(ControlFlow::Continue(())),
                Err(RpcError::Rpc { code, .. }) if code == RPC_IN_WARMUP => {
                    Ok(ControlFlow::Continue(()))
                }
                Err(error) => Err(error.into()),
            },
        )
    }
}
