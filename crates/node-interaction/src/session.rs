use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use regtest_config::RpcConnectionConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::RpcError;

/// A connected JSON-RPC client bound to one node's endpoint and credentials.
///
/// The session is `Sync`; any number of threads may issue calls through a shared reference at
/// the same time. Once [`RpcSession::close`] has been called every further call fails with
/// [`RpcError::SessionClosed`] without touching the network.
#[derive(Debug)]
pub struct RpcSession {
    connection: RpcConnectionConfig,
    url: String,
    client: Client,
    next_request_id: AtomicU64,
    closed: AtomicBool,
}

impl RpcSession {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    const JSON_RPC_VERSION: &str = "1.0";

    /// Builds a session for the endpoint. No request is sent; reachability is established by the
    /// first call.
    pub fn connect(connection: RpcConnectionConfig) -> Result<Self, RpcError> {
        let url = connection.rpc_url();
        let client = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .build()
            .map_err(|source| RpcError::Transport {
                url: url.clone(),
                source,
            })?;

        Ok(Self {
            connection,
            url,
            client,
            next_request_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connection(&self) -> &RpcConnectionConfig {
        &self.connection
    }

    /// Marks the session unusable. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(url = %self.url, "Closed rpc session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Issues one JSON-RPC call and decodes its `result`.
    ///
    /// A JSON `null` result decodes into `Option::None`, which is how "not found" answers such
    /// as `gettxout` for a spent output are represented.
    #[instrument(level = "debug", skip(self, params), fields(url = %self.url), err)]
    pub fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<R, RpcError> {
        if self.is_closed() {
            return Err(RpcError::SessionClosed);
        }

        let request = JsonRpcRequest {
            jsonrpc: Self::JSON_RPC_VERSION,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.connection.user, Some(&self.connection.pass))
            .json(&request)
            .send()
            .map_err(|source| RpcError::Transport {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().map_err(|source| RpcError::Transport {
            url: self.url.clone(),
            source,
        })?;

        // bitcoind answers failed calls with a non-2xx status and a regular JSON-RPC envelope, so
        // the envelope is inspected before the status.
        let envelope = match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(RpcError::HttpStatus {
                    status: status.as_u16(),
                    body,
                });
            }
            Err(source) => {
                return Err(RpcError::Decode {
                    method: method.to_string(),
                    source,
                });
            }
        };

        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        if !status.is_success() {
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|source| {
            RpcError::Decode {
                method: method.to_string(),
                source,
            }
        })
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}
