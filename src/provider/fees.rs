use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context as _, Result};

use crate::chain::{DEFAULT_FEE_ESTIMATION_BLOCKS, account_chain_cost};
use crate::config::PairConfig;
use crate::currency::{Currency, CurrencyKind};
use crate::error::{ServiceError, ServiceResult};
use crate::pairs::pair_id;

/// What an on-chain base fee pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseFeeType {
    NormalClaim,
    ReverseLockup,
    ReverseClaim,
}

// Virtual sizes of the swap transactions on UTXO chains.
const VSIZE_NORMAL_CLAIM: f64 = 170.0;
const VSIZE_REVERSE_LOCKUP: f64 = 153.0;
const VSIZE_REVERSE_CLAIM: f64 = 138.0;

// Gas usage of the swap contract calls.
const ETHER_SWAP_LOCKUP_GAS: u128 = 46_460;
const ETHER_SWAP_CLAIM_GAS: u128 = 24_924;
const ERC20_SWAP_LOCKUP_GAS: u128 = 86_980;
const ERC20_SWAP_CLAIM_GAS: u128 = 24_522;

#[derive(Debug, Clone, Copy)]
enum MinerFeeRate {
    SatPerVbyte(f64),
    GasPriceWei(u128),
}

/// Per-pair percentage fees and per-chain base fees keyed by purpose.
#[derive(Default)]
pub struct FeeProvider {
    percentage_fees: RwLock<HashMap<String, f64>>,
    miner_fee_rates: RwLock<HashMap<String, MinerFeeRate>>,
}

impl FeeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configured percentage fees. Percentages arrive as whole
    /// percent and are kept as fractions.
    pub fn init(&self, pairs: &[PairConfig]) {
        let mut fees = self
            .percentage_fees
            .write()
            .expect("fee provider lock poisoned");
        for pair in pairs {
            fees.insert(pair_id(&pair.base, &pair.quote), pair.fee / 100.0);
        }
    }

    pub fn percentage_fee(&self, pair: &str) -> f64 {
        self.percentage_fees
            .read()
            .expect("fee provider lock poisoned")
            .get(pair)
            .copied()
            .unwrap_or(0.0)
    }

    /// Refreshes the cached fee rate of `currency` from its chain backend.
    pub async fn update_miner_fees(&self, currency: &Currency) -> Result<()> {
        let rate = match currency.kind {
            CurrencyKind::BitcoinLike => {
                let chain = currency
                    .chain
                    .as_ref()
                    .with_context(|| format!("{} has no chain client", currency.symbol))?;
                MinerFeeRate::SatPerVbyte(chain.estimate_fee(DEFAULT_FEE_ESTIMATION_BLOCKS).await?)
            }
            CurrencyKind::Ether | CurrencyKind::Erc20 => {
                let provider = currency
                    .provider
                    .as_ref()
                    .with_context(|| format!("{} has no account provider", currency.symbol))?;
                MinerFeeRate::GasPriceWei(provider.get_gas_price().await?)
            }
        };

        self.miner_fee_rates
            .write()
            .expect("fee provider lock poisoned")
            .insert(currency.symbol.clone(), rate);
        Ok(())
    }

    /// Test and bootstrap hook that pins a UTXO fee rate directly.
    pub fn set_sat_per_vbyte(&self, symbol: &str, rate: f64) {
        self.miner_fee_rates
            .write()
            .expect("fee provider lock poisoned")
            .insert(symbol.to_string(), MinerFeeRate::SatPerVbyte(rate));
    }

    pub fn get_base_fee(
        &self,
        symbol: &str,
        kind: CurrencyKind,
        fee_type: BaseFeeType,
    ) -> ServiceResult<u64> {
        let rate = self
            .miner_fee_rates
            .read()
            .expect("fee provider lock poisoned")
            .get(symbol)
            .copied()
            .ok_or_else(|| ServiceError::CurrencyNotFound(symbol.to_string()))?;

        Ok(match rate {
            MinerFeeRate::SatPerVbyte(sat_per_vbyte) => {
                let vsize = match fee_type {
                    BaseFeeType::NormalClaim => VSIZE_NORMAL_CLAIM,
                    BaseFeeType::ReverseLockup => VSIZE_REVERSE_LOCKUP,
                    BaseFeeType::ReverseClaim => VSIZE_REVERSE_CLAIM,
                };
                (sat_per_vbyte * vsize).ceil() as u64
            }
            MinerFeeRate::GasPriceWei(gas_price) => {
                let gas = match (kind, fee_type) {
                    (CurrencyKind::Erc20, BaseFeeType::ReverseLockup) => ERC20_SWAP_LOCKUP_GAS,
                    (CurrencyKind::Erc20, _) => ERC20_SWAP_CLAIM_GAS,
                    (_, BaseFeeType::ReverseLockup) => ETHER_SWAP_LOCKUP_GAS,
                    (_, _) => ETHER_SWAP_CLAIM_GAS,
                };
                account_chain_cost(gas, gas_price)
            }
        })
    }

    /// Percentage fee charged on `amount` converted at `rate`, rounded up.
    pub fn percentage_fee_amount(&self, pair: &str, rate: f64, amount: u64) -> u64 {
        (self.percentage_fee(pair) * amount as f64 * rate).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::GWEI_DECIMALS;

    fn pair(base: &str, quote: &str, fee: f64) -> PairConfig {
        PairConfig {
            base: base.to_string(),
            quote: quote.to_string(),
            rate: Some(1.0),
            fee,
            timeout_delta: 400,
            max_swap_amount: 4_294_967,
            min_swap_amount: 10_000,
        }
    }

    #[test]
    fn percentage_fees_are_fractions() {
        let provider = FeeProvider::new();
        provider.init(&[pair("BTC", "BTC", 0.5), pair("LTC", "BTC", 2.0)]);

        assert_eq!(provider.percentage_fee("BTC/BTC"), 0.005);
        assert_eq!(provider.percentage_fee("LTC/BTC"), 0.02);
        assert_eq!(provider.percentage_fee("ETH/BTC"), 0.0);
    }

    #[test]
    fn base_fee_scales_with_transaction_size() {
        let provider = FeeProvider::new();
        provider.set_sat_per_vbyte("BTC", 2.0);

        assert_eq!(
            provider
                .get_base_fee("BTC", CurrencyKind::BitcoinLike, BaseFeeType::NormalClaim)
                .unwrap(),
            340
        );
        assert_eq!(
            provider
                .get_base_fee("BTC", CurrencyKind::BitcoinLike, BaseFeeType::ReverseLockup)
                .unwrap(),
            306
        );
        assert_eq!(
            provider
                .get_base_fee("BTC", CurrencyKind::BitcoinLike, BaseFeeType::ReverseClaim)
                .unwrap(),
            276
        );
    }

    #[test]
    fn unknown_symbol_has_no_base_fee() {
        let provider = FeeProvider::new();
        assert!(matches!(
            provider.get_base_fee("BTC", CurrencyKind::BitcoinLike, BaseFeeType::NormalClaim),
            Err(ServiceError::CurrencyNotFound(_))
        ));
    }

    #[test]
    fn percentage_fee_amount_rounds_up() {
        let provider = FeeProvider::new();
        provider.init(&[pair("LTC", "BTC", 2.0)]);

        assert_eq!(
            provider.percentage_fee_amount("LTC/BTC", 250.0, 100_000),
            500_000
        );
        assert_eq!(provider.percentage_fee_amount("LTC/BTC", 1.0, 33), 1);
    }

    #[test]
    fn gas_price_base_fee_uses_contract_gas_usage() {
        let provider = FeeProvider::new();
        provider
            .miner_fee_rates
            .write()
            .unwrap()
            .insert("ETH".to_string(), MinerFeeRate::GasPriceWei(30 * GWEI_DECIMALS));

        // 46460 gas at 30 gwei in 10^-8 ether units.
        assert_eq!(
            provider
                .get_base_fee("ETH", CurrencyKind::Ether, BaseFeeType::ReverseLockup)
                .unwrap(),
            139_380
        );
        assert_eq!(
            provider
                .get_base_fee("ETH", CurrencyKind::Erc20, BaseFeeType::ReverseLockup)
                .unwrap(),
            260_940
        );
    }
}
