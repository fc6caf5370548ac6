use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::PairConfig;
use crate::currency::{CurrencyKind, CurrencyMap};
use crate::error::{ServiceError, ServiceResult};
use crate::pairs::{OrderSide, chain_currency, pair_id, split_pair_id};

// Average block intervals in minutes.
const BLOCK_TIME_BITCOIN: f64 = 10.0;
const BLOCK_TIME_LITECOIN: f64 = 2.5;
const BLOCK_TIME_ACCOUNT_CHAIN: f64 = 0.2;

/// On-chain timeout of a pair in blocks, one value per chain because block
/// times differ.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PairTimeoutBlockDeltas {
    pub base: u32,
    pub quote: u32,
}

/// Converts the configured per-pair timeouts from minutes into blocks and
/// answers timeout queries for both swap directions.
pub struct TimeoutDeltaProvider {
    deltas: RwLock<HashMap<String, PairTimeoutBlockDeltas>>,
    block_times: HashMap<String, f64>,
}

impl TimeoutDeltaProvider {
    pub fn new(currencies: &CurrencyMap) -> Self {
        let block_times = currencies
            .values()
            .map(|currency| {
                let minutes = match (currency.kind, currency.symbol.as_str()) {
                    (CurrencyKind::BitcoinLike, "LTC") => BLOCK_TIME_LITECOIN,
                    (CurrencyKind::BitcoinLike, _) => BLOCK_TIME_BITCOIN,
                    (CurrencyKind::Ether | CurrencyKind::Erc20, _) => BLOCK_TIME_ACCOUNT_CHAIN,
                };
                (currency.symbol.clone(), minutes)
            })
            .collect();

        Self {
            deltas: RwLock::new(HashMap::new()),
            block_times,
        }
    }

    pub fn init(&self, pairs: &[PairConfig]) -> ServiceResult<()> {
        let mut deltas = self.deltas.write().expect("timeout provider lock poisoned");
        for pair in pairs {
            let entry = PairTimeoutBlockDeltas {
                base: self.minutes_to_blocks(&pair.base, pair.timeout_delta)?,
                quote: self.minutes_to_blocks(&pair.quote, pair.timeout_delta)?,
            };
            deltas.insert(pair_id(&pair.base, &pair.quote), entry);
        }
        Ok(())
    }

    /// Timeout in blocks of the chain currency of `(pair, side, is_reverse)`.
    pub fn get_timeout(
        &self,
        pair: &str,
        side: OrderSide,
        is_reverse: bool,
    ) -> ServiceResult<u32> {
        let deltas = self
            .deltas
            .read()
            .expect("timeout provider lock poisoned")
            .get(pair)
            .copied()
            .ok_or_else(|| ServiceError::PairNotFound(pair.to_string()))?;

        let (base, quote) = split_pair_id(pair)?;
        let chain = chain_currency(&base, &quote, side, is_reverse);
        Ok(if chain == base { deltas.base } else { deltas.quote })
    }

    /// Converts a block count from one chain to another, rounding up so the
    /// converted timeout never undershoots the original.
    pub fn convert_blocks(&self, from: &str, to: &str, blocks: u32) -> ServiceResult<u32> {
        let minutes = f64::from(blocks) * self.block_time(from)?;
        Ok((minutes / self.block_time(to)?).ceil() as u32)
    }

    /// Projects when `blocks_missing` more blocks will have been mined.
    pub fn calculate_timeout_date(&self, chain: &str, blocks_missing: u32) -> ServiceResult<u64> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs();
        Ok(now + (f64::from(blocks_missing) * self.block_time(chain)? * 60.0) as u64)
    }

    pub fn snapshot(&self) -> HashMap<String, PairTimeoutBlockDeltas> {
        self.deltas
            .read()
            .expect("timeout provider lock poisoned")
            .clone()
    }

    fn minutes_to_blocks(&self, symbol: &str, minutes: u64) -> ServiceResult<u32> {
        let blocks = (minutes as f64 / self.block_time(symbol)?).ceil() as u32;
        Ok(blocks.max(1))
    }

    fn block_time(&self, symbol: &str) -> ServiceResult<f64> {
        self.block_times
            .get(symbol)
            .copied()
            .ok_or_else(|| ServiceError::CurrencyNotFound(symbol.to_string()))
    }
}
