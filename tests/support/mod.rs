#![allow(dead_code)]

pub mod invoices;
pub mod mocks;

use std::collections::HashMap;
use std::sync::Arc;

use ln_chain_swap::chain::AccountChainManager;
use ln_chain_swap::config::{Config, CurrencyConfig, PairConfig, RatesConfig};
use ln_chain_swap::currency::{Currency, CurrencyKind};
use ln_chain_swap::service::{Collaborators, Service};
use ln_chain_swap::swap::repository::SwapRepository;

use self::mocks::{
    MockAccountProvider, MockChainClient, MockHtlcBuilder, MockLightningClient, MockWallet,
};

pub fn currency_config(symbol: &str, max_zero_conf_amount: u64) -> CurrencyConfig {
    CurrencyConfig {
        symbol: symbol.to_string(),
        network: "regtest".to_string(),
        max_zero_conf_amount,
        bip21_prefix: None,
    }
}

pub fn pair_config(base: &str, quote: &str, rate: Option<f64>, fee: f64) -> PairConfig {
    PairConfig {
        base: base.to_string(),
        quote: quote.to_string(),
        rate,
        fee,
        timeout_delta: 400,
        max_swap_amount: 4_294_967,
        min_swap_amount: 10_000,
    }
}

/// Everything a test needs to poke at the service and its mocks.
pub struct Harness {
    pub service: Service,
    pub chains: HashMap<String, Arc<MockChainClient>>,
    pub lightnings: HashMap<String, Arc<MockLightningClient>>,
    pub wallets: HashMap<String, Arc<MockWallet>>,
    pub provider: Option<Arc<MockAccountProvider>>,
    _store_dir: tempfile::TempDir,
}

pub struct HarnessBuilder {
    config: Config,
    account: bool,
}

impl HarnessBuilder {
    pub fn new(currencies: Vec<CurrencyConfig>, pairs: Vec<PairConfig>) -> Self {
        Self {
            config: Config {
                prepayminerfee: false,
                swapwitnessaddress: false,
                retry_interval: 15,
                rates: RatesConfig { interval: 60 },
                currencies,
                pairs,
            },
            account: false,
        }
    }

    pub fn prepay_miner_fee(mut self) -> Self {
        self.config.prepayminerfee = true;
        self
    }

    pub fn with_account_chain(mut self) -> Self {
        self.account = true;
        self
    }

    pub async fn build(self) -> Harness {
        let store_dir = tempfile::tempdir().expect("create temp store dir");
        let repository = SwapRepository::open(store_dir.path().join("swaps.sqlite3"))
            .expect("open swap repository");

        let provider = self.account.then(|| Arc::new(MockAccountProvider::new()));

        let mut currencies = Vec::new();
        let mut chains = HashMap::new();
        let mut lightnings = HashMap::new();
        let mut wallets: HashMap<String, Arc<MockWallet>> = HashMap::new();
        let mut wallet_handles: HashMap<String, Arc<dyn ln_chain_swap::wallet::Wallet>> =
            HashMap::new();
        let mut htlc_builders: HashMap<String, Arc<dyn ln_chain_swap::wallet::HtlcBuilder>> =
            HashMap::new();

        for currency in &self.config.currencies {
            let kind = match currency.symbol.as_str() {
                "ETH" => CurrencyKind::Ether,
                "USDT" => CurrencyKind::Erc20,
                _ => CurrencyKind::BitcoinLike,
            };

            let wallet = Arc::new(MockWallet::new(&currency.symbol));
            wallets.insert(currency.symbol.clone(), wallet.clone());
            wallet_handles.insert(currency.symbol.clone(), wallet);

            match kind {
                CurrencyKind::BitcoinLike => {
                    let chain = Arc::new(MockChainClient::new());
                    chains.insert(currency.symbol.clone(), chain.clone());

                    let lightning = Arc::new(MockLightningClient::new(&currency.symbol));
                    lightnings.insert(currency.symbol.clone(), lightning.clone());

                    htlc_builders.insert(
                        currency.symbol.clone(),
                        Arc::new(MockHtlcBuilder::new(&currency.symbol)),
                    );

                    currencies.push(Currency {
                        symbol: currency.symbol.clone(),
                        network: currency.network.clone(),
                        kind,
                        chain: Some(chain),
                        lightning: Some(lightning),
                        provider: None,
                    });
                }
                CurrencyKind::Ether | CurrencyKind::Erc20 => {
                    let provider = provider.clone().expect("account chain not enabled");
                    currencies.push(Currency {
                        symbol: currency.symbol.clone(),
                        network: currency.network.clone(),
                        kind,
                        chain: None,
                        lightning: None,
                        provider: Some(provider),
                    });
                }
            }
        }

        let account = provider.clone().map(|provider| AccountChainManager {
            provider,
            chain_id: 33,
            ether_swap_address: "0x24412701b38bbc4d8e6f0cf1f4c7fb41abb71f12".to_string(),
            erc20_swap_address: "0x9c5fd6a8dc6d9f5ea659d9f6ba9ca8cfa1c1f1f1".to_string(),
            tokens: HashMap::from([(
                "USDT".to_string(),
                "0xdAC17F958D2ee523a2206206994597C13D831ec7".to_string(),
            )]),
        });

        let service = Service::new(
            &self.config,
            Collaborators {
                currencies,
                wallets: wallet_handles,
                htlc_builders,
                account,
            },
            repository,
        );
        service.init().await.expect("init service");

        Harness {
            service,
            chains,
            lightnings,
            wallets,
            provider,
            _store_dir: store_dir,
        }
    }
}

/// BTC/BTC service with the fee setup most scenarios use.
pub async fn btc_btc_harness(fee_percent: f64) -> Harness {
    let harness = HarnessBuilder::new(
        vec![currency_config("BTC", 1_000_000)],
        vec![pair_config("BTC", "BTC", Some(1.0), fee_percent)],
    )
    .build()
    .await;
    harness
}
