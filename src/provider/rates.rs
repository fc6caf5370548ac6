use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::PairConfig;
use crate::pairs::pair_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub maximal: u64,
    pub minimal: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairFees {
    pub percentage: f64,
}

/// One pair's tradable snapshot. The hash covers everything a client quotes
/// against, so a stale quote is detected before committing a swap.
#[derive(Debug, Clone, Serialize)]
pub struct PairInfo {
    pub rate: f64,
    pub hash: String,
    pub limits: Limits,
    pub fees: PairFees,
}

/// Maintains the per-pair rate snapshots and the zero-conf policy.
///
/// Rates are fed in from outside; pairs with a fixed configured rate are
/// available right after [`RateProvider::init`], floating pairs only once
/// the first rate arrives.
pub struct RateProvider {
    pairs: RwLock<HashMap<String, PairInfo>>,
    configs: RwLock<HashMap<String, PairConfig>>,
    zero_conf_limits: HashMap<String, u64>,
}

impl RateProvider {
    pub fn new(zero_conf_limits: HashMap<String, u64>) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            zero_conf_limits,
        }
    }

    pub fn init(&self, pairs: &[PairConfig]) {
        {
            let mut configs = self.configs.write().expect("rate provider lock poisoned");
            for pair in pairs {
                configs.insert(pair_id(&pair.base, &pair.quote), pair.clone());
            }
        }

        for pair in pairs {
            if let Some(rate) = pair.rate {
                self.update_rate(&pair_id(&pair.base, &pair.quote), rate);
            }
        }
    }

    /// Replaces the snapshot of `pair` atomically with a freshly hashed one.
    pub fn update_rate(&self, pair: &str, rate: f64) {
        let Some(config) = self
            .configs
            .read()
            .expect("rate provider lock poisoned")
            .get(pair)
            .cloned()
        else {
            return;
        };

        let limits = Limits {
            maximal: config.max_swap_amount,
            minimal: config.min_swap_amount,
        };
        let fees = PairFees {
            percentage: config.fee,
        };
        let info = PairInfo {
            rate,
            hash: snapshot_hash(rate, &limits, &fees),
            limits,
            fees,
        };

        self.pairs
            .write()
            .expect("rate provider lock poisoned")
            .insert(pair.to_string(), info);
    }

    pub fn pair(&self, pair: &str) -> Option<PairInfo> {
        self.pairs
            .read()
            .expect("rate provider lock poisoned")
            .get(pair)
            .cloned()
    }

    pub fn hash(&self, pair: &str) -> Option<String> {
        self.pair(pair).map(|info| info.hash)
    }

    pub fn snapshot(&self) -> HashMap<String, PairInfo> {
        self.pairs
            .read()
            .expect("rate provider lock poisoned")
            .clone()
    }

    /// Whether an unconfirmed lockup of `amount` on `symbol` is acceptable.
    pub fn accept_zero_conf(&self, symbol: &str, amount: u64) -> bool {
        match self.zero_conf_limits.get(symbol) {
            Some(limit) => amount <= *limit,
            None => false,
        }
    }
}

fn snapshot_hash(rate: f64, limits: &Limits, fees: &PairFees) -> String {
    #[derive(Serialize)]
    struct Snapshot<'a> {
        rate: f64,
        limits: &'a Limits,
        fees: &'a PairFees,
    }

    let encoded = serde_json::to_string(&Snapshot { rate, limits, fees })
        .expect("pair snapshot serialization must not fail");
    hex::encode(Sha256::digest(encoded.as_bytes()))
}
