use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::PairConfig;
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn parse(raw: &str) -> ServiceResult<Self> {
        match raw.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(ServiceError::OrderSideNotFound(raw.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

pub fn pair_id(base: &str, quote: &str) -> String {
    format!("{base}/{quote}")
}

pub fn split_pair_id(id: &str) -> ServiceResult<(String, String)> {
    match id.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            Ok((base.to_string(), quote.to_string()))
        }
        _ => Err(ServiceError::PairNotFound(id.to_string())),
    }
}

/// The currency the user interacts with on-chain. For forward swaps that is
/// the currency locked into the HTLC, for reverse swaps the one the service
/// locks for the user to claim.
pub fn chain_currency<'a>(
    base: &'a str,
    quote: &'a str,
    side: OrderSide,
    is_reverse: bool,
) -> &'a str {
    if is_reverse {
        match side {
            OrderSide::Buy => base,
            OrderSide::Sell => quote,
        }
    } else {
        match side {
            OrderSide::Buy => quote,
            OrderSide::Sell => base,
        }
    }
}

/// Counterpart of [`chain_currency`]: the currency paid over Lightning.
pub fn lightning_currency<'a>(
    base: &'a str,
    quote: &'a str,
    side: OrderSide,
    is_reverse: bool,
) -> &'a str {
    chain_currency(base, quote, side, !is_reverse)
}

/// What the service sends and receives in a reverse swap.
pub fn sending_receiving<'a>(base: &'a str, quote: &'a str, side: OrderSide) -> (&'a str, &'a str) {
    match side {
        OrderSide::Buy => (base, quote),
        OrderSide::Sell => (quote, base),
    }
}

/// Converts the pair rate into the conversion factor applied to amounts of
/// the swap at hand.
pub fn swap_rate(pair_rate: f64, side: OrderSide, is_reverse: bool) -> f64 {
    let invert = if is_reverse {
        side == OrderSide::Buy
    } else {
        side == OrderSide::Sell
    };
    if invert { 1.0 / pair_rate } else { pair_rate }
}

/// Supported trading pairs and their static configuration.
#[derive(Default)]
pub struct PairRegistry {
    pairs: RwLock<HashMap<String, PairConfig>>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pair unless one with the same id exists already.
    pub fn add_pair(&self, config: PairConfig) {
        let id = pair_id(&config.base, &config.quote);
        self.pairs
            .write()
            .expect("pair registry lock poisoned")
            .entry(id)
            .or_insert(config);
    }

    pub fn get(&self, id: &str) -> ServiceResult<PairConfig> {
        self.pairs
            .read()
            .expect("pair registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::PairNotFound(id.to_string()))
    }

    pub fn all(&self) -> Vec<PairConfig> {
        self.pairs
            .read()
            .expect("pair registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
