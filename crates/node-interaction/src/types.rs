//! Result types of the remote calls that return structured data.

use serde::{Deserialize, Serialize};

/// The subset of `getwalletinfo` the helpers expose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(rename = "walletname")]
    pub wallet_name: String,
    #[serde(rename = "walletversion", default)]
    pub wallet_version: i64,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub unconfirmed_balance: Option<f64>,
    #[serde(default)]
    pub immature_balance: Option<f64>,
    #[serde(rename = "txcount", default)]
    pub tx_count: u64,
    #[serde(rename = "keypoolsize", default)]
    pub key_pool_size: Option<u64>,
    #[serde(default)]
    pub descriptors: Option<bool>,
}

/// The answer of `createwallet` and `loadwallet`.
///
/// Older nodes report a single `warning` string, newer ones a `warnings` list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLoadResult {
    pub name: String,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type", default)]
    pub script_type: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// An unspent output as returned by `gettxout`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(rename = "bestblock")]
    pub best_block: String,
    pub confirmations: u64,
    /// The output value in BTC.
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
    pub coinbase: bool,
}

/// An unspent output found by `scantxoutset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanTxOutSetUnspent {
    pub txid: String,
    pub vout: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: String,
    pub desc: String,
    /// The output value in BTC.
    pub amount: f64,
    pub height: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanTxOutSetResult {
    pub success: bool,
    #[serde(rename = "txouts", default)]
    pub tx_outs: Option<u64>,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(rename = "bestblock", default)]
    pub best_block: Option<String>,
    #[serde(default)]
    pub unspents: Vec<ScanTxOutSetUnspent>,
    #[serde(default)]
    pub total_amount: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRawTransactionResult {
    pub hex: String,
    pub complete: bool,
}
