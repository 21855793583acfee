use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::SATS_PER_COIN;
use crate::error::{LedgerError, LedgerResult};

/// Reference to one output of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: String,
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Owner and value of an output that has not been spent yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub address: String,
    pub value: u64,
}

// ============================================================================
// RPC records
//
// Shapes returned by `getblock <hash> true` and `getrawtransaction <txid> 1`.
// Only the fields the ledger needs are modelled; everything else is ignored.
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcBlock {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub time: u64,
    /// Transaction ids in block order
    #[serde(default)]
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RpcVin>,
    #[serde(default)]
    pub vout: Vec<RpcVout>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RpcVin {
    pub txid: Option<String>,
    pub vout: Option<u32>,
    /// Generation marker; present only on coinbase inputs
    pub coinbase: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcVout {
    /// Decimal coin amount
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScriptPubKey {
    pub address: Option<String>,
    pub addresses: Option<Vec<String>>,
}

impl RpcVin {
    /// Previous outpoint this input spends. Needs both `txid` and `vout`;
    /// a reference missing either cannot name an output.
    pub fn prevout(&self) -> Option<Outpoint> {
        let txid = self.txid.as_ref()?;
        let vout = self.vout?;
        Some(Outpoint::new(txid.clone(), vout))
    }
}

impl RpcTransaction {
    /// First input exists and carries no previous-transaction reference
    pub fn is_coinbase(&self) -> bool {
        self.vin.first().map(|vin| vin.txid.is_none()).unwrap_or(false)
    }
}

impl RpcVout {
    /// Address list of this output, array form first, then single address.
    pub fn addresses(&self) -> Vec<String> {
        let spk = match &self.script_pub_key {
            Some(spk) => spk,
            None => return Vec::new(),
        };
        if let Some(addrs) = &spk.addresses {
            return addrs.clone();
        }
        match &spk.address {
            Some(addr) => vec![addr.clone()],
            None => Vec::new(),
        }
    }
}

/// Convert a decimal coin amount to satoshis.
///
/// Rounds half away from zero, so `0.00000001` is exactly 1 sat even though
/// the float product lands a hair off. Amounts must fit a signed ledger
/// delta, so anything at or above 2^63 sats is rejected.
pub fn coins_to_sats(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let sats = (value * SATS_PER_COIN as f64).round();
    if sats >= i64::MAX as f64 {
        return None;
    }
    Some(sats as u64)
}

/// `coins_to_sats` with the output location attached to the error
pub fn output_sats(txid: &str, vout: u32, value: f64) -> LedgerResult<u64> {
    coins_to_sats(value).ok_or_else(|| LedgerError::InvalidAmount {
        txid: txid.to_string(),
        vout,
        value,
    })
}
