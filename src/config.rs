use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// Service configuration, loadable from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Globally enables the prepay miner fee for reverse swaps.
    #[serde(default)]
    pub prepayminerfee: bool,

    /// Use P2WSH addresses for swap lockups.
    #[serde(default)]
    pub swapwitnessaddress: bool,

    /// Interval in seconds between lifecycle retry sweeps.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    #[serde(default)]
    pub rates: RatesConfig,

    pub currencies: Vec<CurrencyConfig>,
    pub pairs: Vec<PairConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    /// Interval in seconds between rate refreshes.
    #[serde(default = "default_rates_interval")]
    pub interval: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            interval: default_rates_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    pub symbol: String,
    pub network: String,

    /// Largest lockup amount accepted without a confirmation.
    #[serde(default)]
    pub max_zero_conf_amount: u64,

    /// URI scheme for BIP21 payment requests. Falls back to well-known
    /// schemes per symbol when unset.
    #[serde(default)]
    pub bip21_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub base: String,
    pub quote: String,

    /// Fixed rate for pairs that do not float, like BTC/BTC.
    #[serde(default)]
    pub rate: Option<f64>,

    /// Percentage fee charged on swaps of this pair.
    pub fee: f64,

    /// On-chain timeout expressed in minutes.
    pub timeout_delta: u64,

    #[serde(default = "default_max_swap_amount")]
    pub max_swap_amount: u64,

    #[serde(default = "default_min_swap_amount")]
    pub min_swap_amount: u64,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }
}

fn default_retry_interval() -> u64 {
    15
}

fn default_rates_interval() -> u64 {
    60
}

fn default_max_swap_amount() -> u64 {
    4_294_967
}

fn default_min_swap_amount() -> u64 {
    10_000
}
