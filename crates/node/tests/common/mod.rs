//! Test helpers for running nodes without a bitcoind installation.
//!
//! Nodes are driven by a fake controller script that records liveness in a marker file inside
//! the data directory, and answer RPC calls through an in-process JSON-RPC server.

#![allow(dead_code)]

use std::{
    fs::write,
    net::{SocketAddr, TcpListener},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use regtest_config::{BootstrapOptions, ConfigurationRecord};
use regtest_node::{BitcoindNode, ReadinessProbe};
use serde_json::{Value, json};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// The block height the fake server reports.
pub const FAKE_BLOCK_COUNT: u64 = 101;

const MARKER_FILE: &str = "fake-node.running";

const FAKE_CONTROLLER: &str = r#"#!/usr/bin/env bash
ACTION="$1"
DATADIR="$2"
PORT="$3"
MARKER="${DATADIR}/fake-node.running"

# take_budget <name>: consumes one unit of the budget stored next to the data directory.
take_budget() {
    local budget="${DATADIR}.$1"
    [ -f "$budget" ] || return 1
    local remaining
    remaining="$(cat "$budget")"
    [ "$remaining" -gt 0 ] || return 1
    echo $((remaining - 1)) > "$budget"
}

case "$ACTION" in
    start)
        if ! mkdir -p "$DATADIR"; then
            echo "cannot create data directory ${DATADIR}"
            exit 1
        fi
        echo "$PORT" > "$MARKER" || exit 1
        echo "fake node is running on port ${PORT}"
        ;;
    stop)
        if take_budget hang-stop; then
            sleep 30
        fi
        if take_budget fail-stop; then
            echo "stop timed out"
            exit 1
        fi
        rm -f "$MARKER"
        echo "fake node stopped"
        ;;
    status)
        if take_budget fail-status; then
            echo "status unavailable"
            exit 1
        fi
        if [ -f "$MARKER" ]; then
            echo "fake node is running on port ${PORT}"
        else
            echo "fake node is not running"
        fi
        ;;
    *)
        echo "unknown action ${ACTION}"
        exit 2
        ;;
esac
"#;

/// A scripted misbehavior of the fake controller.
#[derive(Clone, Copy, Debug)]
pub enum ControllerFault {
    /// `stop` exits non-zero and leaves the node alive.
    FailStop,
    /// `stop` sleeps far beyond any test's patience before doing its work.
    HangStop,
    /// `status` exits non-zero.
    FailStatus,
}

impl ControllerFault {
    fn budget_name(&self) -> &'static str {
        match self {
            Self::FailStop => "fail-stop",
            Self::HangStop => "hang-stop",
            Self::FailStatus => "fail-status",
        }
    }
}

/// Makes the next `times` invocations of the faulted action misbehave for the node owning
/// `data_directory`.
pub fn inject_fault(data_directory: &Path, fault: ControllerFault, times: u32) {
    let budget = PathBuf::from(format!(
        "{}.{}",
        data_directory.display(),
        fault.budget_name()
    ));
    write(budget, times.to_string()).expect("Failed to write the fault budget");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A scratch directory holding the fake controller script and the data directories of the
/// nodes created through it.
pub struct TestEnvironment {
    directory: TempDir,
    controller_script: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        init_tracing();

        let directory = tempfile::tempdir().expect("Failed to create the test directory");
        let controller_script = directory.path().join("fake_controller.sh");
        write(&controller_script, FAKE_CONTROLLER).expect("Failed to write the fake controller");

        Self {
            directory,
            controller_script,
        }
    }

    pub fn path(&self) -> &Path {
        self.directory.path()
    }

    pub fn data_directory(&self, name: &str) -> PathBuf {
        self.directory.path().join(name)
    }

    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            node_binary: "bash".to_string(),
            controller_script: Some(self.controller_script.clone()),
        }
    }

    pub fn config(&self, host: &str, name: &str) -> ConfigurationRecord {
        ConfigurationRecord {
            host: host.to_string(),
            data_directory: self.data_directory(name),
            ..Default::default()
        }
    }

    /// A node answering through `server`, with its data directory named `name`.
    pub fn node(&self, server: &FakeRpcServer, name: &str) -> BitcoindNode {
        self.node_with_config(self.config(&server.host(), name))
    }

    pub fn node_with_config(&self, config: ConfigurationRecord) -> BitcoindNode {
        BitcoindNode::with_bootstrap(config, self.bootstrap_options())
            .expect("Failed to create the node")
            .with_readiness_probe(short_readiness_probe())
    }
}

pub fn short_readiness_probe() -> ReadinessProbe {
    ReadinessProbe {
        polling_duration: Duration::from_secs(2),
        interval: Duration::from_millis(20),
    }
}

/// Whether the fake controller considers the node in `data_directory` alive.
pub fn is_marked_running(data_directory: &Path) -> bool {
    data_directory.join(MARKER_FILE).exists()
}

pub fn mark_stopped(data_directory: &Path) {
    std::fs::remove_file(data_directory.join(MARKER_FILE))
        .expect("Failed to remove the running marker");
}

/// A `host:port` nothing listens on.
pub fn closed_host() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind a probe port");
    let address = listener.local_addr().expect("Failed to read the probe port");
    drop(listener);
    address.to_string()
}

/// An in-process JSON-RPC endpoint that answers like a freshly mined regtest node.
///
/// The server runs on its own thread for the rest of the test process.
pub struct FakeRpcServer {
    address: SocketAddr,
    requests: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct ServerState {
    requests: Arc<AtomicUsize>,
    warmup_requests: usize,
}

impl FakeRpcServer {
    pub fn start() -> Self {
        Self::start_with_warmup(0)
    }

    /// A server that answers the first `warmup_requests` calls with the warm-up error.
    pub fn start_with_warmup(warmup_requests: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind the fake server");
        listener
            .set_nonblocking(true)
            .expect("Failed to configure the fake server listener");
        let address = listener
            .local_addr()
            .expect("Failed to read the fake server address");

        let requests = Arc::new(AtomicUsize::new(0));
        let state = ServerState {
            requests: requests.clone(),
            warmup_requests,
        };

        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("Failed to build the fake server runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)
                    .expect("Failed to register the fake server listener");
                let router = Router::new().route("/", post(handle)).with_state(state);
                axum::serve(listener, router)
                    .await
                    .expect("Fake server should run");
            });
        });

        Self { address, requests }
    }

    pub fn host(&self) -> String {
        self.address.to_string()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn handle(
    State(state): State<ServerState>,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let seen = state.requests.fetch_add(1, Ordering::SeqCst);
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    if seen < state.warmup_requests {
        return error_response(id, -28, "Loading block index...");
    }

    let result = match method {
        "getblockcount" => json!(FAKE_BLOCK_COUNT),
        "getnewaddress" => json!("bcrt1qfakeaddress0000000000000000000000000"),
        "generatetoaddress" => {
            let blocks = params.get(0).and_then(Value::as_u64).unwrap_or(0);
            json!((0..blocks).map(|height| format!("{height:064x}")).collect::<Vec<_>>())
        }
        "gettxout" => Value::Null,
        _ => return error_response(id, -32601, "Method not found"),
    };
    (
        StatusCode::OK,
        Json(json!({ "result": result, "error": null, "id": id })),
    )
}

fn error_response(id: Value, code: i64, message: &str) -> (StatusCode, Json<Value>) {
    let status = if code == -32601 {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(json!({
            "result": null,
            "error": { "code": code, "message": message },
            "id": id,
        })),
    )
}
