/// Metrics Module - Prometheus Instrumentation
///
/// - Prometheus registry
/// - Clean helper API
/// - Standard histogram buckets
/// - Optional `/metrics` HTTP endpoint for long sync runs

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Standard latency buckets for histograms (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];

static METRICS_INIT: OnceCell<()> = OnceCell::new();

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // 1. PIPELINE PROGRESS & THROUGHPUT
    // ========================================================================

    /// Total blocks applied to the ledger
    pub static ref BLOCKS_PROCESSED: IntCounter = IntCounter::new(
        "rustyledger_blocks_processed_total",
        "Total blocks applied to the ledger"
    ).unwrap();

    /// Transactions by outcome
    /// Labels: outcome (applied, skipped)
    pub static ref TRANSACTIONS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_transactions_processed_total", "Transactions by outcome"),
        &["outcome"]
    ).unwrap();

    /// Total UTXOs added (outputs registered in the index)
    pub static ref UTXOS_ADDED: IntCounter = IntCounter::new(
        "rustyledger_utxos_added_total",
        "Total UTXOs registered in the index"
    ).unwrap();

    /// Total UTXOs spent (inputs resolved against the index)
    pub static ref UTXOS_SPENT: IntCounter = IntCounter::new(
        "rustyledger_utxos_spent_total",
        "Total UTXOs resolved and removed by inputs"
    ).unwrap();

    /// Inputs whose outpoint was not in the index
    pub static ref UNRESOLVED_INPUTS: IntCounter = IntCounter::new(
        "rustyledger_unresolved_inputs_total",
        "Inputs referencing outpoints not present in the index"
    ).unwrap();

    /// Outputs with no resolvable address
    /// Labels: policy (untracked, bucket)
    pub static ref ADDRESSLESS_OUTPUTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_addressless_outputs_total", "Outputs with no resolvable address"),
        &["policy"]
    ).unwrap();

    /// Chain tip height
    /// Labels: source (rpc, target)
    pub static ref CHAIN_TIP_HEIGHT: IntGaugeVec = IntGaugeVec::new(
        Opts::new("rustyledger_chain_tip_height", "Chain tip height by source"),
        &["source"]
    ).unwrap();

    /// Highest height fully applied
    pub static ref INDEXED_HEIGHT: IntGauge = IntGauge::new(
        "rustyledger_indexed_height",
        "Highest block height fully applied to the ledger"
    ).unwrap();

    // ========================================================================
    // 2. LATENCY HISTOGRAMS
    // ========================================================================

    /// RPC call duration
    /// Labels: method (getblock, getblockhash, getblockcount, getrawtransaction)
    pub static ref RPC_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("rustyledger_rpc_call_duration_seconds", "RPC call latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["method"]
    ).unwrap();

    /// Ledger apply phase duration per block
    pub static ref BLOCK_APPLY_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("rustyledger_block_apply_duration_seconds", "Block apply latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["phase"]
    ).unwrap();

    // ========================================================================
    // 3. ERROR COUNTERS
    // ========================================================================

    /// Database errors
    /// Labels: op (get, put, delete, iterator, write), cf (column family)
    pub static ref DB_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_db_errors_total", "Database errors by operation and CF"),
        &["op", "cf"]
    ).unwrap();

    /// RPC errors
    /// Labels: method, error_type (transport, rpc, decode)
    pub static ref RPC_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_rpc_errors_total", "RPC errors by method and type"),
        &["method", "error_type"]
    ).unwrap();

    /// Invariant violations
    /// Labels: type (negative_balance, total_mismatch)
    pub static ref INVARIANT_VIOLATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("rustyledger_invariant_violations_total", "Invariant violations by type"),
        &["type"]
    ).unwrap();

    // ========================================================================
    // 4. LEDGER STATE
    // ========================================================================

    /// Addresses holding a non-zero balance
    pub static ref LEDGER_ADDRESSES: IntGauge = IntGauge::new(
        "rustyledger_ledger_addresses",
        "Addresses with a non-zero balance"
    ).unwrap();

    /// Outputs currently in the UTXO index
    pub static ref TOTAL_UTXOS_TRACKED: IntGauge = IntGauge::new(
        "rustyledger_utxos_tracked",
        "Outputs currently held in the UTXO index"
    ).unwrap();
}

/// Registers all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    METRICS_INIT
        .get_or_try_init(|| {
            REGISTRY.register(Box::new(BLOCKS_PROCESSED.clone()))?;
            REGISTRY.register(Box::new(TRANSACTIONS_PROCESSED.clone()))?;
            REGISTRY.register(Box::new(UTXOS_ADDED.clone()))?;
            REGISTRY.register(Box::new(UTXOS_SPENT.clone()))?;
            REGISTRY.register(Box::new(UNRESOLVED_INPUTS.clone()))?;
            REGISTRY.register(Box::new(ADDRESSLESS_OUTPUTS.clone()))?;
            REGISTRY.register(Box::new(CHAIN_TIP_HEIGHT.clone()))?;
            REGISTRY.register(Box::new(INDEXED_HEIGHT.clone()))?;

            REGISTRY.register(Box::new(RPC_CALL_DURATION.clone()))?;
            REGISTRY.register(Box::new(BLOCK_APPLY_DURATION.clone()))?;

            REGISTRY.register(Box::new(DB_ERRORS.clone()))?;
            REGISTRY.register(Box::new(RPC_ERRORS.clone()))?;
            REGISTRY.register(Box::new(INVARIANT_VIOLATIONS.clone()))?;

            REGISTRY.register(Box::new(LEDGER_ADDRESSES.clone()))?;
            REGISTRY.register(Box::new(TOTAL_UTXOS_TRACKED.clone()))?;
            Ok(())
        })
        .map(|_| ())
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Serve `GET /metrics` until the process exits
pub async fn serve_metrics(bind: SocketAddr) -> std::io::Result<()> {
    use axum::{routing::get, Router};

    let app = Router::new().route("/metrics", get(|| async { gather_metrics() }));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind = %bind, "Metrics endpoint listening");
    axum::serve(listener, app).await
}

// ============================================================================
// HELPER FUNCTIONS - Clean API for instrumenting code
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn increment_blocks_processed() {
    BLOCKS_PROCESSED.inc();
}

pub fn increment_transactions(outcome: &str, count: u64) {
    TRANSACTIONS_PROCESSED.with_label_values(&[outcome]).inc_by(count);
}

pub fn increment_utxos_added(count: u64) {
    UTXOS_ADDED.inc_by(count);
}

pub fn increment_utxos_spent(count: u64) {
    UTXOS_SPENT.inc_by(count);
}

pub fn increment_unresolved_inputs(count: u64) {
    UNRESOLVED_INPUTS.inc_by(count);
}

pub fn increment_addressless_outputs(policy: &str) {
    ADDRESSLESS_OUTPUTS.with_label_values(&[policy]).inc();
}

pub fn set_chain_tip_height(source: &str, height: u64) {
    CHAIN_TIP_HEIGHT.with_label_values(&[source]).set(height as i64);
}

pub fn set_indexed_height(height: u64) {
    INDEXED_HEIGHT.set(height as i64);
}

pub fn record_rpc_call_duration(method: &str, duration_secs: f64) {
    RPC_CALL_DURATION.with_label_values(&[method]).observe(duration_secs);
}

pub fn record_block_apply_duration(phase: &str, duration_secs: f64) {
    BLOCK_APPLY_DURATION.with_label_values(&[phase]).observe(duration_secs);
}

pub fn increment_db_errors(op: &str, cf: &str) {
    DB_ERRORS.with_label_values(&[op, cf]).inc();
}

pub fn increment_rpc_errors(method: &str, error_type: &str) {
    RPC_ERRORS.with_label_values(&[method, error_type]).inc();
}

pub fn increment_invariant_violations(violation_type: &str) {
    INVARIANT_VIOLATIONS.with_label_values(&[violation_type]).inc();
}

pub fn set_ledger_addresses(count: usize) {
    LEDGER_ADDRESSES.set(count as i64);
}

pub fn set_total_utxos_tracked(count: usize) {
    TOTAL_UTXOS_TRACKED.set(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_twice() {
        init_metrics().unwrap();
        init_metrics().unwrap();
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().unwrap();

        increment_blocks_processed();
        set_chain_tip_height("rpc", 1000);

        let output = gather_metrics();

        assert!(output.contains("rustyledger_blocks_processed_total"));
        assert!(output.contains("rustyledger_chain_tip_height"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_secs() >= 0.01);
    }
}
