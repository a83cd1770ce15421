//! This crate implements all interactions with a running regtest node: the JSON-RPC session and
//! the remote calls layered on top of it.
//!
//! Every helper is a one-shot request/response call through an [`RpcSession`]. Trivial input
//! constraints are checked before anything is sent, and the node's error responses are surfaced
//! as [`RpcError::Rpc`] with the code and message bitcoind returned.

mod chain;
mod error;
mod session;
mod transaction;
mod types;
mod wallet;

pub use error::*;
pub use session::*;
pub use types::*;
