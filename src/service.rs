use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::RngCore as _;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::chain::{
    AccountChainManager, COIN, ChainRpcError, DEFAULT_FEE_ESTIMATION_BLOCKS, GWEI_DECIMALS,
    ETHEREUM_PREPAY_MINER_FEE_GAS_LIMIT, LOCKTIME_REJECTION, account_chain_cost,
};
use crate::config::{Config, CurrencyConfig, PairConfig};
use crate::currency::{Currency, CurrencyKind, CurrencyMap, checksum_address, currency_map};
use crate::error::{ServiceError, ServiceResult};
use crate::event::{EventHub, SwapUpdate, SwapUpdateEvent};
use crate::lightning::RoutingHint;
use crate::lightning::invoice::{amount_sat_from_bolt11, payment_hash_from_bolt11};
use crate::pairs::{
    OrderSide, PairRegistry, chain_currency, lightning_currency, pair_id, sending_receiving,
    split_pair_id, swap_rate,
};
use crate::provider::fees::{BaseFeeType, FeeProvider};
use crate::provider::rates::{PairInfo, RateProvider};
use crate::provider::timeouts::{PairTimeoutBlockDeltas, TimeoutDeltaProvider};
use crate::referral::{Referral, ReferralRegistry};
use crate::swap::manager::{
    CreateReverseSwapArgs, CreateSwapArgs, CreatedSwap, SwapManager,
};
use crate::swap::repository::SwapRepository;
use crate::swap::{ChannelCreation, Swap};
use crate::wallet::{HtlcBuilder, KeyPair, Wallet};

pub const MIN_INBOUND_LIQUIDITY: u64 = 10;
pub const MAX_INBOUND_LIQUIDITY: u64 = 50;

/// Everything the orchestrator talks to. The per-chain clients hang off the
/// currencies; wallets and HTLC builders are keyed by symbol.
pub struct Collaborators {
    pub currencies: Vec<Currency>,
    pub wallets: HashMap<String, Arc<dyn Wallet>>,
    pub htlc_builders: HashMap<String, Arc<dyn HtlcBuilder>>,
    pub account: Option<AccountChainManager>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub version: u64,
    pub connections: u32,
    pub blocks: u64,
    pub scanned_blocks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub active: u32,
    pub inactive: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LightningStatus {
    pub version: String,
    pub block_height: u32,
    pub channels: ChannelStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrencyInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lightning: Option<LightningStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetInfoResponse {
    pub version: String,
    pub chains: HashMap<String, CurrencyInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalletBalanceInfo {
    pub total: u64,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightningBalanceInfo {
    pub local_balance: u64,
    pub remote_balance: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Balances {
    pub wallet_balance: WalletBalanceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lightning_balance: Option<LightningBalanceInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceInfo {
    #[serde(rename = "prepay.minerfee")]
    PrepayMinerFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceWarning {
    #[serde(rename = "reverse.swaps.disabled")]
    ReverseSwapsDisabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetPairsResponse {
    pub pairs: HashMap<String, PairInfo>,
    pub info: Vec<ServiceInfo>,
    pub warnings: Vec<ServiceWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LightningNode {
    pub node_key: String,
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractsResponse {
    pub network: ContractsNetwork,
    pub swap_contracts: SwapContracts,
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractsNetwork {
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapContracts {
    pub ether_swap: String,
    pub erc20_swap: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetSwapTransactionResponse {
    pub transaction_hex: String,
    pub timeout_block_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_eta: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddReferralResponse {
    pub api_key: String,
    pub api_secret: String,
}

pub struct CreateSwapRequest {
    pub pair_id: String,
    pub order_side: String,
    pub preimage_hash: [u8; 32],
    pub refund_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub channel: Option<ChannelCreation>,
    pub referral_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SetSwapInvoiceResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_zero_conf: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bip21: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSwapWithInvoiceResponse {
    #[serde(flatten)]
    pub swap: CreatedSwap,
    #[serde(flatten)]
    pub invoice: SetSwapInvoiceResponse,
}

pub struct CreateReverseSwapRequest {
    pub pair_id: String,
    pub order_side: String,
    pub preimage_hash: [u8; 32],
    pub invoice_amount: Option<f64>,
    pub onchain_amount: Option<f64>,
    pub pair_hash: Option<String>,
    pub claim_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub prepay_miner_fee: bool,
    pub routing_node: Option<String>,
    pub referral_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReverseSwapResponse {
    pub id: String,
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,
    pub lockup_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<String>,
    pub timeout_block_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_fee_invoice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepay_miner_fee_amount: Option<u64>,
}

pub struct SendCoinsRequest {
    pub symbol: String,
    pub address: String,
    pub amount: u64,
    pub send_all: bool,
    pub fee: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendCoinsResponse {
    pub transaction_id: String,
    pub vout: u32,
}

/// The orchestrator. Owns all cross-cutting swap policy and delegates the
/// chain, Lightning and wallet legwork to its collaborators.
pub struct Service {
    currencies: Arc<CurrencyMap>,
    currency_configs: HashMap<String, CurrencyConfig>,
    wallets: Arc<HashMap<String, Arc<dyn Wallet>>>,
    account: Option<Arc<AccountChainManager>>,

    pair_registry: PairRegistry,
    rate_provider: RateProvider,
    fee_provider: FeeProvider,
    timeout_provider: TimeoutDeltaProvider,
    referrals: ReferralRegistry,

    repository: Arc<SwapRepository>,
    manager: SwapManager,
    hub: EventHub,
    nodes: RwLock<HashMap<String, LightningNode>>,

    pairs_config: Vec<PairConfig>,
    allow_reverse_swaps: AtomicBool,
    prepay_miner_fee: AtomicBool,
}

impl Service {
    pub fn new(config: &Config, collaborators: Collaborators, repository: SwapRepository) -> Self {
        let currencies = Arc::new(currency_map(collaborators.currencies));
        let wallets = Arc::new(collaborators.wallets);
        let account = collaborators.account.map(Arc::new);
        let repository = Arc::new(repository);
        let hub = EventHub::new();

        let zero_conf_limits = config
            .currencies
            .iter()
            .map(|currency| (currency.symbol.clone(), currency.max_zero_conf_amount))
            .collect();
        let currency_configs = config
            .currencies
            .iter()
            .map(|currency| (currency.symbol.clone(), currency.clone()))
            .collect();

        let manager = SwapManager::new(
            currencies.clone(),
            wallets.clone(),
            Arc::new(collaborators.htlc_builders),
            account.clone(),
            repository.clone(),
            hub.clone(),
            config.swapwitnessaddress,
        );

        Self {
            timeout_provider: TimeoutDeltaProvider::new(&currencies),
            rate_provider: RateProvider::new(zero_conf_limits),
            fee_provider: FeeProvider::new(),
            pair_registry: PairRegistry::new(),
            referrals: ReferralRegistry::new(),
            currencies,
            currency_configs,
            wallets,
            account,
            repository,
            manager,
            hub,
            nodes: RwLock::new(HashMap::new()),
            pairs_config: config.pairs.clone(),
            allow_reverse_swaps: AtomicBool::new(true),
            prepay_miner_fee: AtomicBool::new(config.prepayminerfee),
        }
    }

    /// Registers the configured pairs, initializes the providers on them and
    /// snapshots the Lightning node URIs.
    pub async fn init(&self) -> ServiceResult<()> {
        let pairs = self.pairs_config.clone();
        for pair in &pairs {
            for symbol in [&pair.base, &pair.quote] {
                if !self.currencies.contains_key(symbol) {
                    return Err(ServiceError::CurrencyNotFound(symbol.clone()));
                }
            }
            self.pair_registry.add_pair(pair.clone());
        }

        self.timeout_provider.init(&pairs)?;
        self.fee_provider.init(&pairs);
        self.rate_provider.init(&pairs);

        self.referrals.load(
            self.repository
                .list_referrals()
                .map_err(ServiceError::Upstream)?,
        );

        for currency in self.currencies.values() {
            if currency.chain.is_none() && currency.provider.is_none() {
                continue;
            }
            if let Err(err) = self.fee_provider.update_miner_fees(currency).await {
                tracing::warn!(symbol = %currency.symbol, error = %err, "miner fee update failed");
            }
        }

        let mut nodes = HashMap::new();
        for (symbol, currency) in self.currencies.iter() {
            let Some(lightning) = &currency.lightning else {
                continue;
            };
            match lightning.get_info().await {
                Ok(info) => {
                    nodes.insert(
                        symbol.clone(),
                        LightningNode {
                            node_key: info.identity_pubkey,
                            uris: info.uris,
                        },
                    );
                }
                Err(err) => {
                    tracing::warn!(symbol = %symbol, error = %err, "node URI snapshot failed");
                }
            }
        }
        *self.nodes.write().expect("node registry lock poisoned") = nodes;

        tracing::info!(pairs = pairs.len(), "service initialized");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapUpdate> {
        self.hub.subscribe()
    }

    pub fn swap_manager(&self) -> &SwapManager {
        &self.manager
    }

    pub fn rate_provider(&self) -> &RateProvider {
        &self.rate_provider
    }

    pub fn fee_provider(&self) -> &FeeProvider {
        &self.fee_provider
    }

    pub fn set_allow_reverse_swaps(&self, allow: bool) {
        self.allow_reverse_swaps.store(allow, Ordering::Relaxed);
    }

    pub fn set_prepay_miner_fee(&self, enabled: bool) {
        self.prepay_miner_fee.store(enabled, Ordering::Relaxed);
    }

    pub async fn get_info(&self) -> GetInfoResponse {
        let mut chains = HashMap::new();

        for (symbol, currency) in self.currencies.iter() {
            let chain = match &currency.chain {
                Some(client) => Some({
                    let network = client.get_network_info().await;
                    let blockchain = client.get_blockchain_info().await;
                    match (network, blockchain) {
                        (Ok(network), Ok(blockchain)) => ChainStatus {
                            version: network.version,
                            connections: network.connections,
                            blocks: blockchain.blocks,
                            scanned_blocks: blockchain.scanned_blocks,
                            error: None,
                        },
                        (Err(err), _) | (_, Err(err)) => ChainStatus {
                            version: 0,
                            connections: 0,
                            blocks: 0,
                            scanned_blocks: 0,
                            error: Some(err.to_string()),
                        },
                    }
                }),
                None => None,
            };

            let lightning = match &currency.lightning {
                Some(client) => Some(match client.get_info().await {
                    Ok(info) => LightningStatus {
                        version: info.version,
                        block_height: info.block_height,
                        channels: ChannelStats {
                            active: info.num_active_channels,
                            inactive: info.num_inactive_channels,
                            pending: info.num_pending_channels,
                        },
                        error: None,
                    },
                    Err(err) => LightningStatus {
                        version: String::new(),
                        block_height: 0,
                        channels: ChannelStats {
                            active: 0,
                            inactive: 0,
                            pending: 0,
                        },
                        error: Some(err.to_string()),
                    },
                }),
                None => None,
            };

            if chain.is_some() || lightning.is_some() {
                chains.insert(symbol.clone(), CurrencyInfo { chain, lightning });
            }
        }

        GetInfoResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            chains,
        }
    }

    pub async fn get_balance(&self) -> ServiceResult<HashMap<String, Balances>> {
        let mut balances = HashMap::new();

        for (symbol, wallet) in self.wallets.iter() {
            let wallet_balance = wallet.get_balance().await?;

            let lightning_balance = match self
                .currencies
                .get(symbol)
                .and_then(|currency| currency.lightning.as_ref())
            {
                Some(client) => {
                    let channels = client.list_channels().await?;
                    let mut local = 0;
                    let mut remote = 0;
                    for channel in channels {
                        local += channel.local_balance;
                        remote += channel.remote_balance;
                    }
                    Some(LightningBalanceInfo {
                        local_balance: local,
                        remote_balance: remote,
                    })
                }
                None => None,
            };

            balances.insert(
                symbol.clone(),
                Balances {
                    wallet_balance: WalletBalanceInfo {
                        total: wallet_balance.total,
                        confirmed: wallet_balance.confirmed,
                        unconfirmed: wallet_balance.unconfirmed,
                    },
                    lightning_balance,
                },
            );
        }

        Ok(balances)
    }

    pub fn get_pairs(&self) -> GetPairsResponse {
        let mut info = Vec::new();
        let mut warnings = Vec::new();

        if self.prepay_miner_fee.load(Ordering::Relaxed) {
            info.push(ServiceInfo::PrepayMinerFee);
        }
        if !self.allow_reverse_swaps.load(Ordering::Relaxed) {
            warnings.push(ServiceWarning::ReverseSwapsDisabled);
        }

        GetPairsResponse {
            pairs: self.rate_provider.snapshot(),
            info,
            warnings,
        }
    }

    pub fn get_nodes(&self) -> HashMap<String, LightningNode> {
        self.nodes
            .read()
            .expect("node registry lock poisoned")
            .clone()
    }

    pub async fn get_routing_hints(
        &self,
        symbol: &str,
        routing_node: &str,
    ) -> ServiceResult<Vec<RoutingHint>> {
        let currency = self.currency(symbol)?;
        Ok(currency
            .lightning_client()?
            .routing_hints(routing_node)
            .await?)
    }

    pub fn get_timeouts(&self) -> HashMap<String, PairTimeoutBlockDeltas> {
        self.timeout_provider.snapshot()
    }

    pub fn get_contracts(&self) -> ServiceResult<ContractsResponse> {
        let account = self
            .account
            .as_ref()
            .ok_or(ServiceError::EthereumNotEnabled)?;
        Ok(ContractsResponse {
            network: ContractsNetwork {
                chain_id: account.chain_id,
            },
            swap_contracts: SwapContracts {
                ether_swap: account.ether_swap_address.clone(),
                erc20_swap: account.erc20_swap_address.clone(),
            },
            tokens: account.tokens.clone(),
        })
    }

    pub async fn get_transaction(&self, symbol: &str, transaction_id: &str) -> ServiceResult<String> {
        let currency = self.currency(symbol)?;
        Ok(currency
            .chain_client()?
            .get_raw_transaction(transaction_id)
            .await?)
    }

    /// Chain passthrough with a refund-safety net: a locktime rejection that
    /// matches a known unfinished lockup is rewritten into a structured
    /// error telling the caller when the refund becomes valid.
    pub async fn broadcast_transaction(
        &self,
        symbol: &str,
        transaction_hex: &str,
    ) -> ServiceResult<String> {
        let currency = self.currency(symbol)?;
        let chain = currency.chain_client()?;

        let err = match chain.send_raw_transaction(transaction_hex).await {
            Ok(transaction_id) => return Ok(transaction_id),
            Err(err) => err,
        };

        let is_locktime_rejection = err
            .downcast_ref::<ChainRpcError>()
            .is_some_and(|rpc| rpc.code == -26 && rpc.message.starts_with(LOCKTIME_REJECTION));
        if !is_locktime_rejection {
            return Err(err.into());
        }

        let Some(swap) = self
            .find_refunded_swap(transaction_hex)
            .map_err(ServiceError::Upstream)?
        else {
            return Err(err.into());
        };

        let blocks = chain.get_blockchain_info().await?.blocks as u32;
        let blocks_missing = swap.timeout_block_height.saturating_sub(blocks);
        let timeout_eta = self
            .timeout_provider
            .calculate_timeout_date(symbol, blocks_missing)?;

        Err(ServiceError::PrematureRefund {
            error: err.to_string(),
            timeout_block_height: swap.timeout_block_height,
            timeout_eta,
        })
    }

    pub async fn derive_keys(&self, symbol: &str, index: u32) -> ServiceResult<KeyPair> {
        Ok(self.wallet(symbol)?.get_keys_by_index(index).await?)
    }

    pub async fn get_address(&self, symbol: &str) -> ServiceResult<String> {
        Ok(self.wallet(symbol)?.get_address().await?)
    }

    pub async fn get_fee_estimation(
        &self,
        symbol: Option<&str>,
        blocks: Option<u32>,
    ) -> ServiceResult<HashMap<String, f64>> {
        let mut estimations = HashMap::new();

        match symbol {
            Some(symbol) => {
                let currency = self.currency(symbol)?;
                let (key, fee) = self.estimate_for(currency, blocks).await?;
                estimations.insert(key, fee);
            }
            None => {
                for currency in self.currencies.values() {
                    if currency.chain.is_none() && currency.provider.is_none() {
                        continue;
                    }
                    let (key, fee) = self.estimate_for(currency, blocks).await?;
                    // ERC20 tokens share the native chain's estimation.
                    estimations.entry(key).or_insert(fee);
                }
            }
        }

        Ok(estimations)
    }

    pub fn add_referral(
        &self,
        id: &str,
        fee_share: u64,
        routing_node: Option<String>,
    ) -> ServiceResult<AddReferralResponse> {
        if id.is_empty() {
            return Err(ServiceError::ReferralIdEmpty);
        }
        if fee_share > 100 {
            return Err(ServiceError::InvalidReferralFeeShare);
        }

        let mut key_bytes = [0u8; 16];
        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        rand::thread_rng().fill_bytes(&mut secret_bytes);

        let referral = Referral {
            id: id.to_string(),
            fee_share,
            routing_node,
            api_key: hex::encode(key_bytes),
            api_secret: hex::encode(secret_bytes),
        };

        self.repository
            .insert_referral(&referral)
            .map_err(ServiceError::Upstream)?;
        self.referrals.add(referral.clone());

        tracing::info!(referral_id = %id, fee_share, "added referral");
        Ok(AddReferralResponse {
            api_key: referral.api_key,
            api_secret: referral.api_secret,
        })
    }

    pub async fn create_swap(&self, request: CreateSwapRequest) -> ServiceResult<CreatedSwap> {
        if self
            .repository
            .get_swap_by_preimage_hash(&hex::encode(request.preimage_hash))
            .map_err(ServiceError::Upstream)?
            .is_some()
        {
            return Err(ServiceError::SwapWithPreimageExists);
        }

        let (base, quote) = split_pair_id(&request.pair_id)?;
        self.pair_registry.get(&request.pair_id)?;
        let side = OrderSide::parse(&request.order_side)?;

        let chain_symbol = chain_currency(&base, &quote, side, false).to_string();
        let chain = self.currency(&chain_symbol)?;

        let (refund_public_key, claim_address) = if chain.kind.is_account_based() {
            let address = request
                .claim_address
                .ok_or(ServiceError::UndefinedParameter("claimAddress"))?;
            (None, Some(checksum_address(&address)?))
        } else {
            let key = request
                .refund_public_key
                .ok_or(ServiceError::UndefinedParameter("refundPublicKey"))?;
            (Some(key), None)
        };

        if let Some(channel) = &request.channel {
            if channel.inbound_liquidity < MIN_INBOUND_LIQUIDITY {
                return Err(ServiceError::BeneathMinInboundLiquidity(
                    MIN_INBOUND_LIQUIDITY,
                ));
            }
            if channel.inbound_liquidity > MAX_INBOUND_LIQUIDITY {
                return Err(ServiceError::ExceedsMaxInboundLiquidity(
                    MAX_INBOUND_LIQUIDITY,
                ));
            }
        }

        let timeout_block_delta = self
            .timeout_provider
            .get_timeout(&request.pair_id, side, false)?;

        let referral_id = self
            .referrals
            .resolve(request.referral_id.as_deref(), None);

        let created = self
            .manager
            .create_swap(CreateSwapArgs {
                pair_id: request.pair_id,
                order_side: side,
                preimage_hash: request.preimage_hash,
                chain_currency: chain_symbol,
                refund_public_key,
                claim_address,
                timeout_block_delta,
                channel: request.channel,
                referral_id,
            })
            .await?;

        self.hub.emit(&created.id, SwapUpdateEvent::SwapCreated);
        Ok(created)
    }

    pub async fn set_swap_invoice(
        &self,
        id: &str,
        invoice: &str,
        pair_hash: Option<&str>,
    ) -> ServiceResult<SetSwapInvoiceResponse> {
        let swap = self
            .repository
            .get_swap(id)
            .map_err(ServiceError::Upstream)?
            .ok_or_else(|| ServiceError::SwapNotFound(id.to_string()))?;

        if swap.invoice.is_some() {
            return Err(ServiceError::SwapHasInvoiceAlready(id.to_string()));
        }

        if let Some(provided) = pair_hash {
            let current = self
                .rate_provider
                .hash(&swap.pair)
                .ok_or_else(|| ServiceError::PairNotFound(swap.pair.clone()))?;
            if provided != current {
                return Err(ServiceError::InvalidPairHash);
            }
        }

        if self
            .repository
            .get_swap_by_invoice(invoice)
            .map_err(ServiceError::Upstream)?
            .is_some()
        {
            return Err(ServiceError::SwapWithInvoiceExists);
        }

        // The invoice has to settle on the same preimage the HTLC locks on.
        let payment_hash = payment_hash_from_bolt11(invoice)?;
        if hex::encode(payment_hash) != swap.preimage_hash {
            return Err(ServiceError::InvoiceInvalidPreimageHash);
        }

        let invoice_amount = amount_sat_from_bolt11(invoice)?.unwrap_or(0);

        let (base, quote) = split_pair_id(&swap.pair)?;
        let side = swap.order_side;
        let rate = match swap.rate {
            Some(rate) => rate,
            None => {
                let pair = self
                    .rate_provider
                    .pair(&swap.pair)
                    .ok_or_else(|| ServiceError::PairNotFound(swap.pair.clone()))?;
                swap_rate(pair.rate, side, false)
            }
        };

        self.verify_amount(&swap.pair, rate, invoice_amount, side, false)?;

        let chain_symbol = chain_currency(&base, &quote, side, false);
        let chain_kind = self.currency(chain_symbol)?.kind;

        let base_fee =
            self.fee_provider
                .get_base_fee(chain_symbol, chain_kind, BaseFeeType::NormalClaim)?;
        let percentage_fee = self
            .fee_provider
            .percentage_fee_amount(&swap.pair, rate, invoice_amount);
        let expected_amount =
            (invoice_amount as f64 * rate).floor() as u64 + base_fee + percentage_fee;

        if let Some(onchain_amount) = swap.onchain_amount
            && expected_amount > onchain_amount
        {
            let maximum = calculate_invoice_amount(
                side,
                rate,
                onchain_amount,
                base_fee,
                self.fee_provider.percentage_fee(&swap.pair),
            );
            return Err(ServiceError::InvalidInvoiceAmount(maximum));
        }

        let accept_zero_conf = self
            .rate_provider
            .accept_zero_conf(chain_symbol, expected_amount);

        self.manager
            .set_swap_invoice(
                &swap,
                invoice,
                expected_amount,
                percentage_fee,
                accept_zero_conf,
                rate,
            )
            .await?;

        if swap.onchain_amount.is_some() {
            return Ok(SetSwapInvoiceResponse::default());
        }

        let lightning_symbol = lightning_currency(&base, &quote, side, false);
        let bip21 = encode_bip21(
            self.bip21_prefix(chain_symbol),
            &swap.lockup_address,
            expected_amount,
            &format!("Send to {lightning_symbol} lightning"),
        );

        Ok(SetSwapInvoiceResponse {
            expected_amount: Some(expected_amount),
            accept_zero_conf: Some(accept_zero_conf),
            bip21: Some(bip21),
        })
    }

    /// Creates a swap and binds its invoice in one call. A failing invoice
    /// bind rolls the fresh records back before the error is surfaced.
    pub async fn create_swap_with_invoice(
        &self,
        request: CreateSwapRequest,
        invoice: &str,
        pair_hash: Option<&str>,
    ) -> ServiceResult<CreateSwapWithInvoiceResponse> {
        let created = self.create_swap(request).await?;

        match self.set_swap_invoice(&created.id, invoice, pair_hash).await {
            Ok(invoice_response) => Ok(CreateSwapWithInvoiceResponse {
                swap: created,
                invoice: invoice_response,
            }),
            Err(err) => {
                if let Err(rollback) = self.manager.destroy_swap(&created.id) {
                    tracing::error!(
                        swap_id = %created.id,
                        error = %rollback,
                        "swap rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    pub async fn create_reverse_swap(
        &self,
        request: CreateReverseSwapRequest,
    ) -> ServiceResult<CreateReverseSwapResponse> {
        if !self.allow_reverse_swaps.load(Ordering::Relaxed) {
            return Err(ServiceError::ReverseSwapsDisabled);
        }

        let (base, quote) = split_pair_id(&request.pair_id)?;
        let pair = self
            .rate_provider
            .pair(&request.pair_id)
            .ok_or_else(|| ServiceError::PairNotFound(request.pair_id.clone()))?;

        if let Some(provided) = &request.pair_hash
            && provided != &pair.hash
        {
            return Err(ServiceError::InvalidPairHash);
        }

        let side = OrderSide::parse(&request.order_side)?;
        let (sending_symbol, receiving_symbol) = sending_receiving(&base, &quote, side);
        let sending = self.currency(sending_symbol)?;

        let (claim_public_key, claim_address) = if sending.kind.is_account_based() {
            let address = request
                .claim_address
                .ok_or(ServiceError::UndefinedParameter("claimAddress"))?;
            (None, Some(checksum_address(&address)?))
        } else {
            if request.prepay_miner_fee {
                return Err(ServiceError::UnsupportedParameter {
                    symbol: sending_symbol.to_string(),
                    param: "prepayMinerFee",
                });
            }
            let key = request
                .claim_public_key
                .ok_or(ServiceError::UndefinedParameter("claimPublicKey"))?;
            (Some(key), None)
        };

        let onchain_timeout_block_delta =
            self.timeout_provider
                .get_timeout(&request.pair_id, side, true)?;
        let converted = self.timeout_provider.convert_blocks(
            sending_symbol,
            receiving_symbol,
            onchain_timeout_block_delta,
        )?;
        // Cross-chain conversions get a proportional safety buffer, same
        // chain a flat one.
        let lightning_timeout_block_delta = if sending_symbol == receiving_symbol {
            converted + 3
        } else {
            converted + (f64::from(converted) * 0.1).ceil() as u32
        };

        let (invoice_amount, onchain_amount_input) =
            match (request.invoice_amount, request.onchain_amount) {
                (Some(_), Some(_)) => return Err(ServiceError::InvoiceAndOnchainAmountSpecified),
                (None, None) => return Err(ServiceError::NoAmountSpecified),
                (invoice, onchain) => (
                    invoice.map(whole_number).transpose()?,
                    onchain.map(whole_number).transpose()?,
                ),
            };

        let rate = swap_rate(pair.rate, side, true);
        let fee_percent = self.fee_provider.percentage_fee(&request.pair_id);
        let base_fee =
            self.fee_provider
                .get_base_fee(sending_symbol, sending.kind, BaseFeeType::ReverseLockup)?;

        let (mut hold_invoice_amount, mut onchain_amount, percentage_fee) = match invoice_amount {
            Some(invoice_amount) => {
                let percentage_fee = self
                    .fee_provider
                    .percentage_fee_amount(&request.pair_id, rate, invoice_amount);
                let onchain = (invoice_amount as f64 * rate
                    - percentage_fee as f64
                    - base_fee as f64)
                    .floor() as i64;
                (invoice_amount, onchain, percentage_fee)
            }
            None => {
                let onchain = onchain_amount_input.expect("one amount must be set");
                let hold = (((onchain + base_fee) as f64 / rate) / (1.0 - fee_percent)).ceil()
                    as u64;
                let percentage_fee = (hold as f64 * rate * fee_percent).ceil() as u64;
                (hold, onchain as i64, percentage_fee)
            }
        };

        self.verify_amount(&request.pair_id, rate, hold_invoice_amount, side, true)?;

        let prepay_active =
            self.prepay_miner_fee.load(Ordering::Relaxed) || request.prepay_miner_fee;
        let mut prepay_miner_fee_invoice_amount = None;
        let mut prepay_miner_fee_onchain_amount = None;

        if prepay_active {
            match sending.kind {
                CurrencyKind::BitcoinLike => {
                    let prepay = (base_fee as f64 / rate).ceil() as u64;
                    hold_invoice_amount = hold_invoice_amount.saturating_sub(prepay);
                    prepay_miner_fee_invoice_amount = Some(prepay);
                }
                CurrencyKind::Ether | CurrencyKind::Erc20 => {
                    let gas_price = sending.account_provider()?.get_gas_price().await?;
                    let prepay_onchain =
                        account_chain_cost(ETHEREUM_PREPAY_MINER_FEE_GAS_LIMIT, gas_price);
                    let prepay_invoice =
                        self.prepay_invoice_amount(sending, receiving_symbol, rate, prepay_onchain)?;

                    if invoice_amount.is_some() {
                        onchain_amount -= prepay_onchain as i64;
                        hold_invoice_amount = hold_invoice_amount.saturating_sub(prepay_invoice);
                    }

                    prepay_miner_fee_onchain_amount = Some(prepay_onchain);
                    prepay_miner_fee_invoice_amount = Some(prepay_invoice);
                }
            }
        }

        if onchain_amount < 1 {
            return Err(ServiceError::OnchainAmountTooLow);
        }
        let onchain_amount = onchain_amount as u64;

        let referral_id = self.referrals.resolve(
            request.referral_id.as_deref(),
            request.routing_node.as_deref(),
        );

        let created = self
            .manager
            .create_reverse_swap(CreateReverseSwapArgs {
                pair_id: request.pair_id,
                order_side: side,
                preimage_hash: request.preimage_hash,
                sending: sending_symbol.to_string(),
                receiving: receiving_symbol.to_string(),
                hold_invoice_amount,
                onchain_amount,
                percentage_fee,
                prepay_miner_fee_invoice_amount,
                prepay_miner_fee_onchain_amount,
                claim_public_key,
                claim_address,
                onchain_timeout_block_delta,
                lightning_timeout_block_delta,
                routing_node: request.routing_node,
                referral_id,
            })
            .await?;

        self.hub.emit(&created.id, SwapUpdateEvent::SwapCreated);

        Ok(CreateReverseSwapResponse {
            id: created.id,
            invoice: created.invoice,
            redeem_script: created.redeem_script,
            lockup_address: created.lockup_address,
            refund_address: created.refund_address,
            timeout_block_height: created.timeout_block_height,
            onchain_amount: invoice_amount.map(|_| onchain_amount),
            miner_fee_invoice: created.miner_fee_invoice,
            prepay_miner_fee_amount: prepay_miner_fee_invoice_amount,
        })
    }

    /// Read-only projection of a swap's lockup transaction, with the refund
    /// ETA while the swap is still live.
    pub async fn get_swap_transaction(&self, id: &str) -> ServiceResult<GetSwapTransactionResponse> {
        let swap = self
            .repository
            .get_swap(id)
            .map_err(ServiceError::Upstream)?
            .ok_or_else(|| ServiceError::SwapNotFound(id.to_string()))?;

        let transaction_id = swap
            .lockup_transaction_id
            .ok_or_else(|| ServiceError::SwapNoLockup(id.to_string()))?;

        let (base, quote) = split_pair_id(&swap.pair)?;
        let chain_symbol = chain_currency(&base, &quote, swap.order_side, false);
        let chain = self.currency(chain_symbol)?.chain_client()?;

        let transaction_hex = chain.get_raw_transaction(&transaction_id).await?;

        let timeout_eta = if swap.status.is_final() {
            None
        } else {
            let blocks = chain.get_blockchain_info().await?.blocks as u32;
            let blocks_missing = swap.timeout_block_height.saturating_sub(blocks);
            Some(
                self.timeout_provider
                    .calculate_timeout_date(chain_symbol, blocks_missing)?,
            )
        };

        Ok(GetSwapTransactionResponse {
            transaction_hex,
            timeout_block_height: swap.timeout_block_height,
            timeout_eta,
        })
    }

    pub async fn send_coins(&self, request: SendCoinsRequest) -> ServiceResult<SendCoinsResponse> {
        let wallet = self.wallet(&request.symbol)?;

        let response = if request.send_all {
            wallet.sweep_wallet(&request.address, request.fee).await?
        } else {
            wallet
                .send_to_address(&request.address, request.amount, request.fee)
                .await?
        };

        Ok(SendCoinsResponse {
            transaction_id: response.transaction_id,
            vout: response.vout.unwrap_or(0),
        })
    }

    /// Checks an amount against the pair limits, scaling it into base units
    /// first when the swap direction requires it.
    fn verify_amount(
        &self,
        pair: &str,
        rate: f64,
        amount: u64,
        side: OrderSide,
        is_reverse: bool,
    ) -> ServiceResult<()> {
        let scaled = scale_to_base_units(amount, rate, side, is_reverse);

        let info = self
            .rate_provider
            .pair(pair)
            .ok_or_else(|| ServiceError::PairNotFound(pair.to_string()))?;

        if scaled.floor() as u64 > info.limits.maximal {
            return Err(ServiceError::ExceedMaximalAmount {
                amount: scaled.floor() as u64,
                maximal: info.limits.maximal,
            });
        }
        if (scaled.ceil() as u64) < info.limits.minimal {
            return Err(ServiceError::BeneathMinimalAmount {
                amount: scaled.ceil() as u64,
                minimal: info.limits.minimal,
            });
        }
        Ok(())
    }

    /// Converts the prepay gas cost into units of the hold invoice. ERC20
    /// pairs price their token, not gas, so the conversion pivots through
    /// the native Ether pair.
    fn prepay_invoice_amount(
        &self,
        sending: &Currency,
        receiving_symbol: &str,
        rate: f64,
        prepay_onchain: u64,
    ) -> ServiceResult<u64> {
        let ether_rate = match sending.kind {
            CurrencyKind::Ether => rate,
            _ => {
                let ether_symbol = self
                    .currencies
                    .values()
                    .find(|currency| currency.kind == CurrencyKind::Ether)
                    .map(|currency| currency.symbol.clone())
                    .ok_or(ServiceError::EthereumNotEnabled)?;
                self.pivot_rate(&ether_symbol, receiving_symbol)?
            }
        };

        Ok((prepay_onchain as f64 / ether_rate).ceil() as u64)
    }

    /// Ether units per invoice unit, read from whichever direction of the
    /// Ether pair is registered.
    fn pivot_rate(&self, ether_symbol: &str, receiving_symbol: &str) -> ServiceResult<f64> {
        if let Some(pair) = self
            .rate_provider
            .pair(&pair_id(ether_symbol, receiving_symbol))
        {
            // base/quote = ETH/receiving: ether per invoice unit is 1/rate
            // of the quoted direction, which getRate(BUY, reverse) yields.
            return Ok(swap_rate(pair.rate, OrderSide::Buy, true));
        }
        if let Some(pair) = self
            .rate_provider
            .pair(&pair_id(receiving_symbol, ether_symbol))
        {
            return Ok(swap_rate(pair.rate, OrderSide::Sell, true));
        }
        Err(ServiceError::PairNotFound(pair_id(
            ether_symbol,
            receiving_symbol,
        )))
    }

    async fn estimate_for(
        &self,
        currency: &Currency,
        blocks: Option<u32>,
    ) -> ServiceResult<(String, f64)> {
        match currency.kind {
            CurrencyKind::BitcoinLike => {
                let fee = currency
                    .chain_client()?
                    .estimate_fee(blocks.unwrap_or(DEFAULT_FEE_ESTIMATION_BLOCKS))
                    .await?;
                Ok((currency.symbol.clone(), fee))
            }
            CurrencyKind::Ether | CurrencyKind::Erc20 => {
                let gas_price = currency.account_provider()?.get_gas_price().await?;
                let key = self
                    .currencies
                    .values()
                    .find(|candidate| candidate.kind == CurrencyKind::Ether)
                    .map(|candidate| candidate.symbol.clone())
                    .unwrap_or_else(|| currency.symbol.clone());
                Ok((key, gas_price as f64 / GWEI_DECIMALS as f64))
            }
        }
    }

    fn find_refunded_swap(&self, transaction_hex: &str) -> anyhow::Result<Option<Swap>> {
        let raw = hex::decode(transaction_hex)?;
        let transaction: bitcoin::Transaction = bitcoin::consensus::encode::deserialize(&raw)?;

        for input in &transaction.input {
            let previous = input.previous_output.txid.to_string();
            if let Some(swap) = self.repository.find_swap_by_lockup_transaction_id(&previous)?
                && !swap.status.is_final()
            {
                return Ok(Some(swap));
            }
        }
        Ok(None)
    }

    fn bip21_prefix(&self, symbol: &str) -> &str {
        if let Some(config) = self.currency_configs.get(symbol)
            && let Some(prefix) = &config.bip21_prefix
        {
            return prefix;
        }
        match symbol {
            "BTC" => "bitcoin",
            "LTC" => "litecoin",
            _ => "bitcoin",
        }
    }

    fn currency(&self, symbol: &str) -> ServiceResult<&Currency> {
        self.currencies
            .get(symbol)
            .ok_or_else(|| ServiceError::CurrencyNotFound(symbol.to_string()))
    }

    fn wallet(&self, symbol: &str) -> ServiceResult<&Arc<dyn Wallet>> {
        self.wallets
            .get(symbol)
            .ok_or_else(|| ServiceError::CurrencyNotFound(symbol.to_string()))
    }
}

/// Largest invoice amount that still fits into `onchain_amount` after fees.
pub fn calculate_invoice_amount(
    side: OrderSide,
    rate: f64,
    onchain_amount: u64,
    base_fee: u64,
    percentage_fee: f64,
) -> u64 {
    let effective_rate = if side == OrderSide::Buy { 1.0 / rate } else { rate };
    (((onchain_amount as f64 - base_fee as f64) * effective_rate) / (1.0 + percentage_fee)).floor()
        as u64
}

fn scale_to_base_units(amount: u64, rate: f64, side: OrderSide, is_reverse: bool) -> f64 {
    let scale = if is_reverse {
        side == OrderSide::Sell
    } else {
        side == OrderSide::Buy
    };
    if scale {
        (amount as f64 * rate).floor()
    } else {
        amount as f64
    }
}

fn whole_number(amount: f64) -> ServiceResult<u64> {
    if amount.fract() != 0.0 || amount < 0.0 {
        return Err(ServiceError::NotWholeNumber(amount));
    }
    Ok(amount as u64)
}

fn encode_bip21(prefix: &str, address: &str, amount_sat: u64, label: &str) -> String {
    format!(
        "{prefix}:{address}?amount={}&label={}",
        satoshis_to_coins(amount_sat),
        percent_encode(label)
    )
}

fn satoshis_to_coins(satoshis: u64) -> String {
    let coins = format!("{:.8}", satoshis as f64 / COIN as f64);
    coins
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
