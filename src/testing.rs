//! In-memory chain for processor tests.
//!
//! Blocks are pushed in height order; block hashes are derived from the
//! height. Transactions registered as missing answer `getrawtransaction`
//! with the same error pivxd gives for an unknown txid.

use std::collections::{HashMap, HashSet};

use crate::error::ChainError;
use crate::rpc::ChainSource;
use crate::types::{RpcBlock, RpcTransaction, RpcVin, RpcVout, ScriptPubKey};

#[derive(Default)]
pub struct MemoryChain {
    blocks: Vec<RpcBlock>,
    transactions: HashMap<String, RpcTransaction>,
    missing: HashSet<String>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block holding `txs` in order, returns its height
    pub fn push_block(&mut self, txs: Vec<RpcTransaction>) -> u64 {
        self.push_block_with_missing(txs, &[])
    }

    /// Append a block whose txid list also names `missing` txids the
    /// source cannot return. Missing txids come after `txs`.
    pub fn push_block_with_missing(&mut self, txs: Vec<RpcTransaction>, missing: &[&str]) -> u64 {
        let height = self.blocks.len() as u64;
        let mut txids: Vec<String> = txs.iter().map(|tx| tx.txid.clone()).collect();
        for tx in txs {
            self.transactions.insert(tx.txid.clone(), tx);
        }
        for txid in missing {
            self.missing.insert(txid.to_string());
            txids.push(txid.to_string());
        }
        self.blocks.push(RpcBlock {
            hash: block_hash_for(height),
            time: 1_454_124_731 + height * 60,
            tx: txids,
        });
        height
    }

    /// Append a block with an explicit txid order, for ordering tests
    pub fn push_ordered_block(&mut self, txs: Vec<RpcTransaction>, order: &[&str]) -> u64 {
        let height = self.blocks.len() as u64;
        for tx in txs {
            self.transactions.insert(tx.txid.clone(), tx);
        }
        self.blocks.push(RpcBlock {
            hash: block_hash_for(height),
            time: 1_454_124_731 + height * 60,
            tx: order.iter().map(|s| s.to_string()).collect(),
        });
        height
    }
}

pub fn block_hash_for(height: u64) -> String {
    format!("{:064x}", height + 0xb10c)
}

impl ChainSource for MemoryChain {
    async fn chain_height(&self) -> Result<u64, ChainError> {
        match self.blocks.len() {
            0 => Err(ChainError::NotFound("empty chain".to_string())),
            n => Ok(n as u64 - 1),
        }
    }

    async fn block_hash(&self, height: u64) -> Result<String, ChainError> {
        self.blocks
            .get(height as usize)
            .map(|b| b.hash.clone())
            .ok_or_else(|| ChainError::Rpc {
                code: -8,
                message: "Block height out of range".to_string(),
            })
    }

    async fn block(&self, hash: &str) -> Result<RpcBlock, ChainError> {
        self.blocks
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block {}", hash)))
    }

    async fn transaction(&self, txid: &str) -> Result<RpcTransaction, ChainError> {
        if self.missing.contains(txid) {
            return Err(ChainError::Rpc {
                code: -5,
                message: "No information available about transaction".to_string(),
            });
        }
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(txid.to_string()))
    }
}

/// Output paying `value` coins to a single address
pub fn pay(address: &str, value: f64) -> RpcVout {
    RpcVout {
        value,
        script_pub_key: Some(ScriptPubKey {
            address: Some(address.to_string()),
            addresses: None,
        }),
    }
}

/// Output listing several addresses (bare multisig style)
pub fn pay_many(addresses: &[&str], value: f64) -> RpcVout {
    RpcVout {
        value,
        script_pub_key: Some(ScriptPubKey {
            address: None,
            addresses: Some(addresses.iter().map(|a| a.to_string()).collect()),
        }),
    }
}

/// Output with no resolvable address
pub fn nonstandard(value: f64) -> RpcVout {
    RpcVout {
        value,
        script_pub_key: Some(ScriptPubKey {
            address: None,
            addresses: None,
        }),
    }
}

pub fn coinbase(txid: &str, vout: Vec<RpcVout>) -> RpcTransaction {
    RpcTransaction {
        txid: txid.to_string(),
        vin: vec![RpcVin {
            txid: None,
            vout: None,
            coinbase: Some("04ffff001d0104".to_string()),
        }],
        vout,
    }
}

/// Transaction spending `inputs` (txid, vout) into `vout`
pub fn spend(txid: &str, inputs: &[(&str, u32)], vout: Vec<RpcVout>) -> RpcTransaction {
    RpcTransaction {
        txid: txid.to_string(),
        vin: inputs
            .iter()
            .map(|(prev, n)| RpcVin {
                txid: Some(prev.to_string()),
                vout: Some(*n),
                coinbase: None,
            })
            .collect(),
        vout,
    }
}
