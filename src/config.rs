//! Configuration
//!
//! `config.toml` merged with `RUSTYLEDGER__SECTION__KEY` environment
//! overrides, held in a process-wide cell, then read into `Settings`.
//! Missing keys fall back to the defaults below.

pub use config::{Config, Environment, File as ConfigFile};
pub use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::path::Path;

use crate::constants::DEFAULT_MAX_HEIGHT;
use crate::error::{LedgerError, LedgerResult};
use crate::processor::UnresolvedOutputPolicy;
use crate::telemetry::TelemetryConfig;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const ENV_PREFIX: &str = "RUSTYLEDGER";

/// Build a `Config` from an optional TOML file plus environment overrides
pub fn load_config(path: &str) -> LedgerResult<Config> {
    let required = Path::new(path).exists() || path != DEFAULT_CONFIG_PATH;
    let config = Config::builder()
        .add_source(ConfigFile::with_name(path).required(required))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    Ok(config)
}

pub fn init_global_config(path: &str) -> LedgerResult<()> {
    let config = load_config(path)?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| LedgerError::Config("Config already set".to_string()))?;
    Ok(())
}

pub fn get_global_config() -> LedgerResult<&'static Config> {
    GLOBAL_CONFIG
        .get()
        .ok_or_else(|| LedgerError::Config("Config not initialized".to_string()))
}

/// Remote node connection
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub timeout_secs: u64,
}

/// Block walk behaviour
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Ceiling on the height to process
    pub max_height: u64,
    /// Clear balances left by a previous run before starting at genesis
    pub reset_ledger: bool,
    /// Write block/tx/vin/vout records alongside the ledger
    pub archive: bool,
    /// Blocks between sampled ledger statistics lines
    pub progress_interval: u64,
    /// Compare ledger total against the UTXO index when the run ends
    pub verify_on_finish: bool,
    pub unresolved_outputs: UnresolvedOutputPolicy,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub rpc: RpcSettings,
    pub db_path: String,
    pub sync: SyncSettings,
    pub logging: TelemetryConfig,
    pub metrics_bind: Option<SocketAddr>,
}

impl Settings {
    pub fn from_config(config: &Config) -> LedgerResult<Self> {
        let rpc = RpcSettings {
            url: config
                .get_string("rpc.url")
                .unwrap_or_else(|_| "http://127.0.0.1:7200".to_string()),
            user: config.get_string("rpc.user").unwrap_or_default(),
            pass: config.get_string("rpc.pass").unwrap_or_default(),
            timeout_secs: get_u64(config, "rpc.timeout_secs", 30)?,
        };

        let db_path = config
            .get_string("paths.db_path")
            .unwrap_or_else(|_| "ledger.db".to_string());
        let db_path = shellexpand::tilde(&db_path).to_string();

        let unresolved_outputs = match config
            .get_string("sync.unresolved_outputs")
            .unwrap_or_else(|_| "untracked".to_string())
            .as_str()
        {
            "untracked" => UnresolvedOutputPolicy::Untracked,
            "bucket" => UnresolvedOutputPolicy::Bucket(
                config
                    .get_string("sync.unresolved_bucket")
                    .unwrap_or_else(|_| "unknown".to_string()),
            ),
            other => {
                return Err(LedgerError::Config(format!(
                    "sync.unresolved_outputs must be 'untracked' or 'bucket', got '{}'",
                    other
                )))
            }
        };

        let sync = SyncSettings {
            max_height: get_u64(config, "sync.max_height", DEFAULT_MAX_HEIGHT)?,
            reset_ledger: config.get_bool("sync.reset_ledger").unwrap_or(true),
            archive: config.get_bool("sync.archive").unwrap_or(true),
            progress_interval: get_u64(config, "sync.progress_interval", 1000)?,
            verify_on_finish: config.get_bool("sync.verify_on_finish").unwrap_or(true),
            unresolved_outputs,
        };

        let defaults = TelemetryConfig::default();
        let logging = TelemetryConfig {
            log_level: config.get_string("logging.level").unwrap_or(defaults.log_level),
            log_format: config.get_string("logging.format").unwrap_or(defaults.log_format),
            log_file: config.get_string("logging.file").ok().or(defaults.log_file),
            rotation: config.get_string("logging.rotation").unwrap_or(defaults.rotation),
        };

        let metrics_bind = match config.get_string("metrics.bind") {
            Ok(bind) => Some(bind.parse::<SocketAddr>().map_err(|e| {
                LedgerError::Config(format!("metrics.bind '{}': {}", bind, e))
            })?),
            Err(_) => None,
        };

        Ok(Settings {
            rpc,
            db_path,
            sync,
            logging,
            metrics_bind,
        })
    }
}

fn get_u64(config: &Config, key: &str, default: u64) -> LedgerResult<u64> {
    match config.get_int(key) {
        Ok(v) if v >= 0 => Ok(v as u64),
        Ok(v) => Err(LedgerError::Config(format!("{} must not be negative, got {}", key, v))),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e.into()),
    }
}
