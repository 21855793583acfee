/// Chain Data Source
///
/// The block processor only needs four calls from the node:
/// - `getblockcount`
/// - `getblockhash <height>`
/// - `getblock <hash> true` (txid list, not full transactions)
/// - `getrawtransaction <txid> 1`
///
/// `RpcChainSource` speaks JSON-RPC 1.0 over HTTP with basic auth, the way
/// pivxd / bitcoind expect it. Tests plug in an in-memory source instead.

use std::time::Duration;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::RpcSettings;
use crate::error::ChainError;
use crate::metrics;
use crate::types::{RpcBlock, RpcTransaction};

/// Calls above this are logged as slow
const SLOW_RPC_SECS: f64 = 5.0;

/// Read access to the chain the ledger is built from
#[allow(async_fn_in_trait)]
pub trait ChainSource {
    /// Height of the most recent block known to the source
    async fn chain_height(&self) -> Result<u64, ChainError>;

    async fn block_hash(&self, height: u64) -> Result<String, ChainError>;

    async fn block(&self, hash: &str) -> Result<RpcBlock, ChainError>;

    async fn transaction(&self, txid: &str) -> Result<RpcTransaction, ChainError>;
}

/// JSON-RPC client for a pivxd-style node
pub struct RpcChainSource {
    client: reqwest::Client,
    url: String,
    user: String,
    pass: String,
}

impl RpcChainSource {
    pub fn new(settings: &RpcSettings) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            user: settings.user.clone(),
            pass: settings.pass.clone(),
        })
    }

    /// One JSON-RPC round trip, timed and decoded into `T`
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let timer = metrics::Timer::new();

        let result = self.call_raw(method, params).await;

        let elapsed = timer.elapsed_secs();
        metrics::record_rpc_call_duration(method, elapsed);
        if elapsed > SLOW_RPC_SECS {
            warn!(method = method, duration_secs = elapsed, "Slow RPC call");
        }

        let value = result.map_err(|e| {
            let error_type = match &e {
                ChainError::Transport(_) => "transport",
                ChainError::Rpc { .. } => "rpc",
                _ => "decode",
            };
            metrics::increment_rpc_errors(method, error_type);
            e
        })?;

        serde_json::from_value(value).map_err(|e| {
            metrics::increment_rpc_errors(method, "decode");
            ChainError::Decode(format!("{}: {}", method, e))
        })
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        debug!(method = method, params = %params, "RPC call");

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&json!({
                "jsonrpc": "1.0",
                "id": "rustyledger",
                "method": method,
                "params": params
            }))
            .send()
            .await?;

        // pivxd answers RPC errors with HTTP 500 and a JSON body, so the
        // body is parsed regardless of status.
        let status = response.status();
        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body).map_err(|e| {
            ChainError::Transport(format!("HTTP {} with non-JSON body: {}", status, e))
        })?;

        parse_rpc_response(method, json)
    }
}

/// Split a JSON-RPC envelope into result or error
fn parse_rpc_response(method: &str, mut json: Value) -> Result<Value, ChainError> {
    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(ChainError::Rpc { code, message });
    }

    match json.get_mut("result").map(Value::take) {
        Some(Value::Null) | None => Err(ChainError::MissingResult {
            method: method.to_string(),
        }),
        Some(result) => Ok(result),
    }
}

impl ChainSource for RpcChainSource {
    async fn chain_height(&self) -> Result<u64, ChainError> {
        self.call("getblockcount", json!([])).await
    }

    async fn block_hash(&self, height: u64) -> Result<String, ChainError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn block(&self, hash: &str) -> Result<RpcBlock, ChainError> {
        // boolean `true`, older daemons reject a numeric verbosity here
        self.call("getblock", json!([hash, true])).await
    }

    async fn transaction(&self, txid: &str) -> Result<RpcTransaction, ChainError> {
        self.call("getrawtransaction", json!([txid, 1])).await
    }
}
