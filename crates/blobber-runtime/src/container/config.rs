//! # Node Configuration
//!
//! Unified configuration for every subsystem, loaded from one TOML file.
//! Every section is optional and falls back to its `Default`.
//!
//! ## Startup Requirements
//!
//! - `blobber.stake_pool.delegate_wallet` MUST be a 64-character hex id
//! - Worker counts, intervals and retry bounds MUST be non-zero
//! - A config that fails [`NodeConfig::validate`] stops the process

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bl_01_chain_gateway::GatewayConfig;
use bl_05_redemption_scheduler::RedemptionConfig;
use serde::Deserialize;
use shared_types::{HashStrategy, Keccak256Strategy, Sha256Strategy};
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path of the ed25519 keys file (public key line, secret key line).
    pub keys_file: PathBuf,
    /// Hash function for lookup and integrity hashes.
    pub hash_strategy: HashStrategyKind,
    /// Terms and stake pool advertised on chain.
    pub blobber: BlobberConfig,
    /// Metadata store and blob directory.
    pub storage: StorageConfig,
    /// Chain access.
    pub chain: ChainConfig,
    /// Write-marker redemption.
    pub writemarker_redeem: RedemptionConfig,
    /// On-chain registration at startup.
    pub registration: RegistrationConfig,
    /// Periodic health-check transactions.
    pub health_check: HealthCheckConfig,
    /// Periodic settings updates (USD pricing only).
    pub update_settings: UpdateSettingsConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check everything that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys_file.as_os_str().is_empty() {
            return Err(invalid("keys_file", "must be set"));
        }
        self.blobber.validate()?;
        self.storage.validate()?;

        let redeem = &self.writemarker_redeem;
        if redeem.frequency_secs == 0 {
            return Err(invalid("writemarker_redeem.frequency_secs", "must be > 0"));
        }
        if redeem.num_workers == 0 {
            return Err(invalid("writemarker_redeem.num_workers", "must be > 0"));
        }
        if redeem.max_consecutive_unverified == Some(0) {
            return Err(invalid(
                "writemarker_redeem.max_consecutive_unverified",
                "must be > 0 when set",
            ));
        }
        for (field, policy) in [
            ("writemarker_redeem.confirmation", &redeem.confirmation),
            ("chain.gateway.confirmation", &self.chain.gateway.confirmation),
        ] {
            if policy.max_retries == 0 {
                return Err(invalid(field, "max_retries must be > 0"));
            }
        }

        if self.registration.max_attempts == 0 {
            return Err(invalid("registration.max_attempts", "must be > 0"));
        }
        if self.health_check.interval_secs == 0 {
            return Err(invalid("health_check.interval_secs", "must be > 0"));
        }
        if self.update_settings.interval_secs == 0 {
            return Err(invalid("update_settings.interval_secs", "must be > 0"));
        }
        Ok(())
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Cannot read config {path}: {error}")]
    Io {
        /// Path of the file that failed to load.
        path: String,
        /// Error message from the I/O operation.
        error: String,
    },

    /// Config file is not valid TOML for [`NodeConfig`].
    #[error("Cannot parse config: {0}")]
    Parse(String),

    /// Delegate wallet is not a 64-character hex id.
    #[error("Invalid delegate wallet: {0:?}")]
    InvalidDelegateWallet(String),

    /// A field is out of range.
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Hash function selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategyKind {
    #[default]
    Sha256,
    Keccak256,
}

impl HashStrategyKind {
    pub fn build(self) -> Arc<dyn HashStrategy> {
        match self {
            HashStrategyKind::Sha256 => Arc::new(Sha256Strategy),
            HashStrategyKind::Keccak256 => Arc::new(Keccak256Strategy),
        }
    }
}

/// What the blobber offers on chain.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlobberConfig {
    /// Public base URL clients reach this blobber at.
    pub url: String,
    /// Offered capacity in bytes. Zero disables health checks.
    pub capacity: u64,
    /// Read price per GB, in tokens (or USD with `price_in_usd`).
    pub read_price: f64,
    /// Write price per GB, in tokens (or USD with `price_in_usd`).
    pub write_price: f64,
    /// Prices are in USD and converted with the chain price feed.
    pub price_in_usd: bool,
    pub min_lock_demand: f64,
    pub max_offer_duration_secs: u64,
    pub challenge_completion_time_secs: u64,
    pub stake_pool: StakePoolConfig,
}

impl Default for BlobberConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5051".to_string(),
            capacity: 1 << 30,
            read_price: 0.01,
            write_price: 0.1,
            price_in_usd: false,
            min_lock_demand: 0.1,
            max_offer_duration_secs: 30 * 24 * 3600,
            challenge_completion_time_secs: 120,
            stake_pool: StakePoolConfig::default(),
        }
    }
}

impl BlobberConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(invalid("blobber.url", "must be set"));
        }
        if !(self.read_price >= 0.0 && self.write_price >= 0.0) {
            return Err(invalid("blobber prices", "must be non-negative numbers"));
        }
        if !(0.0..=1.0).contains(&self.min_lock_demand) {
            return Err(invalid("blobber.min_lock_demand", "must be within 0..=1"));
        }
        self.stake_pool.validate()
    }
}

/// Delegate stake pool. Stake amounts are in tokens.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StakePoolConfig {
    pub delegate_wallet: String,
    pub min_stake: f64,
    pub max_stake: f64,
    pub num_delegates: u32,
    pub service_charge: f64,
}

impl Default for StakePoolConfig {
    fn default() -> Self {
        Self {
            delegate_wallet: String::new(),
            min_stake: 1.0,
            max_stake: 100.0,
            num_delegates: 50,
            service_charge: 0.3,
        }
    }
}

impl StakePoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let wallet = &self.delegate_wallet;
        if wallet.len() != 64 || !wallet.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidDelegateWallet(wallet.clone()));
        }
        if !(self.min_stake >= 0.0 && self.min_stake <= self.max_stake) {
            return Err(invalid("blobber.stake_pool", "need 0 <= min_stake <= max_stake"));
        }
        if !(0.0..=1.0).contains(&self.service_charge) {
            return Err(invalid("blobber.stake_pool.service_charge", "must be within 0..=1"));
        }
        Ok(())
    }
}

/// Metadata store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Lost on exit. Development and tests.
    Memory,
    /// Single file rewritten on every commit.
    #[default]
    File,
    /// RocksDB (feature `rocksdb`).
    Rocksdb,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Metadata store path (file or RocksDB directory).
    pub path: PathBuf,
    /// Root of the blob directory; empty keeps blobs in memory.
    pub blob_dir: PathBuf,
    /// Attempts to open the store before giving up.
    pub open_retries: u32,
    /// Pause between open attempts, in milliseconds.
    pub open_retry_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: PathBuf::from("./data/blobber.db"),
            blob_dir: PathBuf::from("./data/files"),
            open_retries: 30,
            open_retry_interval_ms: 2_000,
        }
    }
}

impl StorageConfig {
    pub fn open_retry_interval(&self) -> Duration {
        Duration::from_millis(self.open_retry_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.open_retries == 0 {
            return Err(invalid("storage.open_retries", "must be > 0"));
        }
        if self.backend != StorageBackend::Memory && self.path.as_os_str().is_empty() {
            return Err(invalid("storage.path", "must be set for persistent backends"));
        }
        Ok(())
    }
}

/// How the node reaches the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    #[default]
    JsonRpc,
    /// In-process simulated chain.
    Simulated,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub mode: ChainMode,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_attempts: u32,
    pub retry_interval_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_interval_secs: 3,
        }
    }
}

impl RegistrationConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateSettingsConfig {
    pub interval_secs: u64,
}

impl Default for UpdateSettingsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
        }
    }
}

impl UpdateSettingsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

    fn valid() -> NodeConfig {
        let mut config = NodeConfig {
            keys_file: PathBuf::from("keys.txt"),
            ..NodeConfig::default()
        };
        config.blobber.stake_pool.delegate_wallet = WALLET.to_string();
        config
    }

    #[test]
    fn test_parse_sections_and_defaults() {
        let config = NodeConfig::parse(&format!(
            r#"
            keys_file = "/etc/blobber/keys.txt"
            hash_strategy = "keccak256"

            [blobber]
            url = "https://blobber.example:5051"
            capacity = 2048
            price_in_usd = true

            [blobber.stake_pool]
            delegate_wallet = "{WALLET}"

            [storage]
            backend = "memory"

            [chain]
            mode = "simulated"

            [chain.gateway.confirmation]
            interval_ms = 500

            [writemarker_redeem]
            frequency_secs = 30
            max_consecutive_unverified = 12
            "#
        ))
        .unwrap();

        assert_eq!(config.hash_strategy, HashStrategyKind::Keccak256);
        assert_eq!(config.blobber.capacity, 2048);
        assert!(config.blobber.price_in_usd);
        assert_eq!(config.blobber.read_price, 0.01);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.open_retries, 30);
        assert_eq!(config.chain.mode, ChainMode::Simulated);
        assert_eq!(config.chain.gateway.confirmation.interval_ms, 500);
        assert_eq!(config.chain.gateway.confirmation.max_retries, 10);
        assert_eq!(config.writemarker_redeem.frequency_secs, 30);
        assert_eq!(config.writemarker_redeem.num_workers, 5);
        assert_eq!(config.writemarker_redeem.max_consecutive_unverified, Some(12));
        assert_eq!(config.registration.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_backend_is_a_parse_error() {
        assert!(matches!(
            NodeConfig::parse("[storage]\nbackend = \"postgres\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_delegate_wallet_must_be_64_hex() {
        let mut config = valid();
        config.blobber.stake_pool.delegate_wallet = "abc".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDelegateWallet(_))
        ));

        config.blobber.stake_pool.delegate_wallet = "z".repeat(64);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDelegateWallet(_))
        ));
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let mut config = valid();
        config.writemarker_redeem.num_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "writemarker_redeem.num_workers", .. })
        ));

        let mut config = valid();
        config.registration.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.writemarker_redeem.max_consecutive_unverified = Some(0);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.storage.open_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stake_and_price_ranges() {
        let mut config = valid();
        config.blobber.stake_pool.min_stake = 10.0;
        config.blobber.stake_pool.max_stake = 1.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.blobber.write_price = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.blobber.min_lock_demand = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            NodeConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
