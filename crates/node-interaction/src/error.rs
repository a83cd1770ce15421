use thiserror::Error;

/// The errors a remote call through an [`RpcSession`](crate::RpcSession) can produce.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The session was closed because its node stopped.
    #[error("rpc session is closed")]
    SessionClosed,

    /// The call was rejected before anything was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to reach the rpc endpoint {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status and no JSON-RPC error object, e.g. a 401
    /// for wrong credentials.
    #[error("rpc endpoint returned http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The node executed the call and reported an error.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("failed to decode the response of `{method}`")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// The node answered successfully but the answer does not describe a usable result.
    #[error("{0}")]
    UnexpectedResponse(String),
}

impl RpcError {
    /// Whether the node reported an error whose message contains `needle`.
    pub fn rpc_message_contains(&self, needle: &str) -> bool {
        matches!(self, Self::Rpc { message, .. } if message.contains(needle))
    }
}
