//! Incremental address-balance ledger built from a UTXO chain over JSON-RPC.

pub mod archive;
pub mod chain_state;
pub mod config;
pub mod constants;
pub mod db_handles;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod report;
pub mod rpc;
pub mod sync;
pub mod telemetry;
pub mod types;
pub mod utxo;

#[cfg(test)]
mod testing;
