use serde_json::json;
use tracing::{debug, instrument};

use crate::{RpcError, RpcSession, WalletInfo, WalletLoadResult};

/// The number of satoshis in one bitcoin.
const SATS_PER_BTC: f64 = 100_000_000.0;

impl RpcSession {
    pub fn get_wallet_info(&self) -> Result<WalletInfo, RpcError> {
        self.call("getwalletinfo", json!([]))
    }

    pub fn create_wallet(&self, wallet_name: &str) -> Result<WalletLoadResult, RpcError> {
        self.call("createwallet", json!([wallet_name]))
    }

    pub fn load_wallet(&self, wallet_name: &str) -> Result<WalletLoadResult, RpcError> {
        self.call("loadwallet", json!([wallet_name]))
    }

    pub fn unload_wallet(&self, wallet_name: &str) -> Result<(), RpcError> {
        let _: serde_json::Value = self.call("unloadwallet", json!([wallet_name]))?;
        Ok(())
    }

    /// Makes sure a wallet with this name exists and is loaded, whatever its current state.
    ///
    /// Loading is attempted first; a wallet that is already loaded counts as success. When
    /// loading fails the wallet is created, and if creation races with an existing wallet on
    /// disk the load is retried once.
    #[instrument(level = "info", skip(self), err)]
    pub fn ensure_wallet(&self, wallet_name: &str) -> Result<(), RpcError> {
        let error = match self.load_wallet(wallet_name) {
            Ok(_) => return Ok(()),
            Err(error) => error,
        };
        if error.rpc_message_contains("already loaded")
            || error.rpc_message_contains("already exists")
        {
            return Ok(());
        }
        if !matches!(error, RpcError::Rpc { .. }) {
            return Err(error);
        }
        debug!(%error, "Wallet could not be loaded, creating it");

        match self.create_wallet(wallet_name) {
            Ok(_) => Ok(()),
            Err(error) if error.rpc_message_contains("already exists") => {
                self.load_wallet(wallet_name).map(|_| ())
            }
            Err(error) => Err(error),
        }
    }

    /// A new native segwit (`bcrt1q...`) address from the loaded wallet.
    pub fn generate_bech32(&self, label: &str) -> Result<String, RpcError> {
        self.call("getnewaddress", json!([label, "bech32"]))
    }

    /// A new taproot (`bcrt1p...`) address from the loaded wallet.
    pub fn generate_bech32m(&self, label: &str) -> Result<String, RpcError> {
        self.call("getnewaddress", json!([label, "bech32m"]))
    }

    /// Pays `sats` satoshis to `address` from the loaded wallet and returns the txid.
    #[instrument(level = "info", skip(self), err)]
    pub fn send_to_address(&self, address: &str, sats: u64) -> Result<String, RpcError> {
        if sats == 0 {
            return Err(RpcError::InvalidInput(
                "amount must be greater than 0".to_string(),
            ));
        }
        if address.is_empty() {
            return Err(RpcError::InvalidInput("address is empty".to_string()));
        }
        self.call("sendtoaddress", json!([address, sats_to_btc(sats)]))
    }
}

fn sats_to_btc(sats: u64) -> f64 {
    sats as f64 / SATS_PER_BTC
}
