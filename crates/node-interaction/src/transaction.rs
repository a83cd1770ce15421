//! Signing and broadcasting of raw transactions, exchanged as hex strings.

use serde_json::json;
use tracing::instrument;

use crate::{RpcError, RpcSession, SignRawTransactionResult};

impl RpcSession {
    /// Signs a raw transaction with the keys of the loaded wallet and returns the signed hex.
    ///
    /// A partially signed transaction is an error.
    #[instrument(level = "info", skip_all, err)]
    pub fn sign_raw_transaction_with_wallet(&self, tx_hex: &str) -> Result<String, RpcError> {
        if tx_hex.is_empty() {
            return Err(RpcError::InvalidInput("transaction hex is empty".to_string()));
        }
        let result: SignRawTransactionResult =
            self.call("signrawtransactionwithwallet", json!([tx_hex]))?;
        if !result.complete {
            return Err(RpcError::UnexpectedResponse(
                "transaction signing incomplete".to_string(),
            ));
        }
        Ok(result.hex)
    }

    /// Submits a signed raw transaction to the node's mempool and returns its txid.
    #[instrument(level = "info", skip_all, err)]
    pub fn broadcast_transaction(&self, tx_hex: &str) -> Result<String, RpcError> {
        if tx_hex.is_empty() {
            return Err(RpcError::InvalidInput("transaction hex is empty".to_string()));
        }
        self.call("sendrawtransaction", json!([tx_hex]))
    }
}
