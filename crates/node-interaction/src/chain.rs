use serde_json::json;
use tracing::instrument;

use crate::{RpcError, RpcSession, ScanTxOutSetResult, ScanTxOutSetUnspent, TxOut};

impl RpcSession {
    pub fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", json!([]))
    }

    /// Succeeds when the node answers a `getblockcount`.
    pub fn health_check(&self) -> Result<(), RpcError> {
        self.get_block_count().map(|_| ())
    }

    /// Mines `blocks` blocks paying their rewards to `miner`, returning the new block hashes.
    #[instrument(level = "info", skip(self), err)]
    pub fn warp(&self, blocks: u32, miner: &str) -> Result<Vec<String>, RpcError> {
        if blocks == 0 {
            return Err(RpcError::InvalidInput(
                "blocks must be greater than 0".to_string(),
            ));
        }
        if miner.is_empty() {
            return Err(RpcError::InvalidInput("miner must be provided".to_string()));
        }
        self.call("generatetoaddress", json!([blocks, miner]))
    }

    /// Looks up an output. `None` means the output is spent or never existed.
    pub fn get_tx_out(
        &self,
        txid: &str,
        vout: u32,
        include_mempool: bool,
    ) -> Result<Option<TxOut>, RpcError> {
        if txid.is_empty() {
            return Err(RpcError::InvalidInput("txid is empty".to_string()));
        }
        self.call("gettxout", json!([txid, vout, include_mempool]))
    }

    /// Scans the whole UTXO set for outputs paying to `address`; the address does not need to
    /// belong to a loaded wallet.
    #[instrument(level = "info", skip(self), err)]
    pub fn scan_tx_out_set_for_address(
        &self,
        address: &str,
    ) -> Result<Vec<ScanTxOutSetUnspent>, RpcError> {
        if address.is_empty() {
            return Err(RpcError::InvalidInput("address is empty".to_string()));
        }
        let descriptor = format!("addr({address})");
        let result: ScanTxOutSetResult = self.call("scantxoutset", json!(["start", [descriptor]]))?;
        if !result.success {
            return Err(RpcError::UnexpectedResponse(
                "scantxoutset was not successful".to_string(),
            ));
        }
        Ok(result.unspents)
    }
}
