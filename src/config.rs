// src/config.rs

//! # Configuration
//!
//! Settings are loaded from a single JSON file. `Config` is the single source of
//! truth for chain endpoints, contract addresses, batching limits and the
//! sampling window used when reading a price feed's history.

use ethers::types::Address;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, str::FromStr};

/// Multicall3 is deployed at the same address on every major EVM chain.
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

pub const DEFAULT_MAX_CALLS_PER_BATCH: usize = 100;
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 4;
pub const DEFAULT_LOOKBACK_DAYS: u64 = 365;
pub const MAX_LOOKBACK_DAYS: u64 = 3_650;
/// Smallest stride, as a fraction of a day's rounds, is 1 / MAX_STRIDE_DIVISOR.
pub const MAX_STRIDE_DIVISOR: u64 = 100;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub chains: HashMap<String, PerChainConfig>,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a single JSON file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse config from JSON: {}", path.as_ref().display()))?;
        Ok(cfg)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("No chains configured"));
        }
        for (name, chain) in &self.chains {
            chain.validate().with_context(|| format!("Invalid config for chain {}", name))?;
        }
        self.sampling.validate()
    }

    pub fn get_chain_config(&self, name: &str) -> Result<&PerChainConfig> {
        self.chains.get(name).ok_or_else(|| eyre::eyre!("Chain config not found: {}", name))
    }
}

//================================================================================================//
//                                        Chain Config                                            //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Chainlink feed registry. Only some chains have one deployed.
    pub feed_registry_address: Option<Address>,
    #[serde(default = "default_multicall_address")]
    pub multicall_address: Address,
    #[serde(default = "default_max_calls_per_batch")]
    pub max_calls_per_batch: usize,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    pub rps_limit: Option<u32>,
    pub max_concurrent_requests: Option<u32>,
    pub rate_limit_timeout_secs: Option<u64>,
}

fn default_multicall_address() -> Address {
    Address::from_str(MULTICALL3_ADDRESS).unwrap_or_default()
}

fn default_max_calls_per_batch() -> usize {
    DEFAULT_MAX_CALLS_PER_BATCH
}

fn default_max_concurrent_batches() -> usize {
    DEFAULT_MAX_CONCURRENT_BATCHES
}

impl PerChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(eyre::eyre!("RPC URL is missing"));
        }
        if self.multicall_address.is_zero() {
            return Err(eyre::eyre!("Multicall address must not be zero"));
        }
        if self.max_calls_per_batch == 0 {
            return Err(eyre::eyre!("max_calls_per_batch must be at least 1"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(eyre::eyre!("max_concurrent_batches must be at least 1"));
        }
        Ok(())
    }
}

/// Rate limiter knobs derived from a chain's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rps_limit: u32,
    pub max_concurrent_requests: u32,
    pub rate_limit_burst_size: u32,
    pub rate_limit_timeout_secs: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rps_limit: 25,
            max_concurrent_requests: 8,
            rate_limit_burst_size: 5,
            rate_limit_timeout_secs: 30,
        }
    }
}

impl From<&PerChainConfig> for ChainSettings {
    fn from(config: &PerChainConfig) -> Self {
        let defaults = Self::default();
        Self {
            rps_limit: config.rps_limit.unwrap_or(defaults.rps_limit),
            max_concurrent_requests: config.max_concurrent_requests.unwrap_or(defaults.max_concurrent_requests),
            rate_limit_burst_size: defaults.rate_limit_burst_size,
            rate_limit_timeout_secs: config.rate_limit_timeout_secs.unwrap_or(defaults.rate_limit_timeout_secs),
        }
    }
}

//================================================================================================//
//                                       Sampling Config                                          //
//================================================================================================//

/// Window and stride used to subsample a feed's round history.
///
/// The stride is `rounds_per_day * stride_numerator / stride_denominator`, rounded
/// half-up. The defaults give a one year window sampled every 0.8 days' worth of
/// rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,
    #[serde(default = "default_stride_numerator")]
    pub stride_numerator: u64,
    #[serde(default = "default_stride_denominator")]
    pub stride_denominator: u64,
}

fn default_lookback_days() -> u64 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_stride_numerator() -> u64 {
    4
}

fn default_stride_denominator() -> u64 {
    5
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            stride_numerator: default_stride_numerator(),
            stride_denominator: default_stride_denominator(),
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lookback_days == 0 {
            return Err(eyre::eyre!("sampling.lookback_days must be at least 1"));
        }
        if self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(eyre::eyre!(
                "sampling.lookback_days must be at most {}, got {}",
                MAX_LOOKBACK_DAYS,
                self.lookback_days
            ));
        }
        if self.stride_numerator == 0 || self.stride_denominator == 0 {
            return Err(eyre::eyre!("sampling stride factor must be positive"));
        }
        // Keeps the number of planned rounds bounded
        if self.stride_denominator > self.stride_numerator.saturating_mul(MAX_STRIDE_DIVISOR) {
            return Err(eyre::eyre!(
                "sampling stride {}/{} is below 1/{} of a day",
                self.stride_numerator,
                self.stride_denominator,
                MAX_STRIDE_DIVISOR
            ));
        }
        Ok(())
    }
}
