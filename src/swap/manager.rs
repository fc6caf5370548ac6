use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use serde::Serialize;
use uuid::Uuid;

use super::repository::{SwapRepository, UniqueKey, unique_violation};
use super::{ChannelCreation, ReverseSwap, Swap};
use crate::chain::AccountChainManager;
use crate::currency::{CurrencyKind, CurrencyMap};
use crate::error::{ServiceError, ServiceResult};
use crate::event::{EventHub, SwapUpdateEvent};
use crate::pairs::OrderSide;
use crate::wallet::{HtlcBuilder, HtlcParams, Wallet};

pub struct CreateSwapArgs {
    pub pair_id: String,
    pub order_side: OrderSide,
    pub preimage_hash: [u8; 32],
    pub chain_currency: String,
    pub refund_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub timeout_block_delta: u32,
    pub channel: Option<ChannelCreation>,
    pub referral_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSwap {
    pub id: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_address: Option<String>,
    pub timeout_block_height: u32,
}

pub struct CreateReverseSwapArgs {
    pub pair_id: String,
    pub order_side: OrderSide,
    pub preimage_hash: [u8; 32],
    pub sending: String,
    pub receiving: String,
    pub hold_invoice_amount: u64,
    pub onchain_amount: u64,
    pub percentage_fee: u64,
    pub prepay_miner_fee_invoice_amount: Option<u64>,
    pub prepay_miner_fee_onchain_amount: Option<u64>,
    pub claim_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub onchain_timeout_block_delta: u32,
    pub lightning_timeout_block_delta: u32,
    pub routing_node: Option<String>,
    pub referral_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedReverseSwap {
    pub id: String,
    pub invoice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_fee_invoice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,
    pub lockup_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<String>,
    pub timeout_block_height: u32,
}

/// Builds swap HTLCs, binds invoices and drives record lifecycles on behalf
/// of the orchestrator.
pub struct SwapManager {
    currencies: Arc<CurrencyMap>,
    wallets: Arc<HashMap<String, Arc<dyn Wallet>>>,
    htlc_builders: Arc<HashMap<String, Arc<dyn HtlcBuilder>>>,
    account: Option<Arc<AccountChainManager>>,
    repository: Arc<SwapRepository>,
    hub: EventHub,
    witness_address: bool,
}

impl SwapManager {
    pub fn new(
        currencies: Arc<CurrencyMap>,
        wallets: Arc<HashMap<String, Arc<dyn Wallet>>>,
        htlc_builders: Arc<HashMap<String, Arc<dyn HtlcBuilder>>>,
        account: Option<Arc<AccountChainManager>>,
        repository: Arc<SwapRepository>,
        hub: EventHub,
        witness_address: bool,
    ) -> Self {
        Self {
            currencies,
            wallets,
            htlc_builders,
            account,
            repository,
            hub,
            witness_address,
        }
    }

    pub async fn create_swap(&self, args: CreateSwapArgs) -> ServiceResult<CreatedSwap> {
        let currency = self
            .currencies
            .get(&args.chain_currency)
            .ok_or_else(|| ServiceError::CurrencyNotFound(args.chain_currency.clone()))?;

        let id = Uuid::new_v4().to_string();
        let timeout_block_height =
            current_height(currency).await? + args.timeout_block_delta;

        let mut swap = Swap {
            id: id.clone(),
            pair: args.pair_id,
            order_side: args.order_side,
            preimage_hash: hex::encode(args.preimage_hash),
            invoice: None,
            rate: None,
            expected_amount: None,
            percentage_fee: None,
            accept_zero_conf: None,
            onchain_amount: None,
            lockup_address: String::new(),
            lockup_transaction_id: None,
            timeout_block_height,
            refund_public_key: None,
            claim_address: None,
            key_index: None,
            redeem_script: None,
            referral_id: args.referral_id,
            status: SwapUpdateEvent::SwapCreated,
            created_at: unix_time(),
        };

        match currency.kind {
            CurrencyKind::BitcoinLike => {
                let refund_public_key = args
                    .refund_public_key
                    .ok_or(ServiceError::UndefinedParameter("refundPublicKey"))?;

                let wallet = self.wallet(&args.chain_currency)?;
                let key_index = self
                    .repository
                    .reserve_key_index(&args.chain_currency)
                    .context("reserve key index")?;
                let keys = wallet.get_keys_by_index(key_index).await?;

                let builder = self.htlc_builder(&args.chain_currency)?;
                let script = builder
                    .build(HtlcParams {
                        preimage_hash: &args.preimage_hash,
                        claim_public_key: &keys.public_key,
                        refund_public_key: &refund_public_key,
                        timeout_block_height,
                        witness_address: self.witness_address,
                    })
                    .context("build swap HTLC")?;

                swap.lockup_address = script.lockup_address;
                swap.redeem_script = Some(script.redeem_script);
                swap.refund_public_key = Some(refund_public_key);
                swap.key_index = Some(key_index);
            }
            CurrencyKind::Ether | CurrencyKind::Erc20 => {
                let claim_address = args
                    .claim_address
                    .ok_or(ServiceError::UndefinedParameter("claimAddress"))?;
                swap.lockup_address = self.contract_address(currency.kind)?;
                swap.claim_address = Some(claim_address);
            }
        }

        if let Err(err) = self.repository.insert_swap(&swap) {
            return Err(match unique_violation(&err) {
                Some(UniqueKey::SwapPreimageHash) => ServiceError::SwapWithPreimageExists,
                _ => err.into(),
            });
        }

        if let Some(channel) = args.channel {
            self.repository
                .insert_channel_creation(&swap.id, &channel)
                .context("persist channel creation")?;
        }

        tracing::info!(
            swap_id = %swap.id,
            pair = %swap.pair,
            lockup_address = %swap.lockup_address,
            "created swap"
        );

        Ok(CreatedSwap {
            id,
            address: swap.lockup_address,
            redeem_script: swap.redeem_script,
            claim_address: swap.claim_address,
            timeout_block_height,
        })
    }

    /// Binds `invoice` to `swap` and emits the `InvoiceSet` update once the
    /// binding is durable.
    pub async fn set_swap_invoice(
        &self,
        swap: &Swap,
        invoice: &str,
        expected_amount: u64,
        percentage_fee: u64,
        accept_zero_conf: bool,
        rate: f64,
    ) -> ServiceResult<()> {
        if let Err(err) = self.repository.set_swap_invoice(
            &swap.id,
            invoice,
            expected_amount,
            percentage_fee,
            accept_zero_conf,
            rate,
        ) {
            return Err(match unique_violation(&err) {
                Some(UniqueKey::SwapInvoice) => ServiceError::SwapWithInvoiceExists,
                _ => err.into(),
            });
        }

        tracing::info!(swap_id = %swap.id, expected_amount, "invoice set");
        self.hub.emit(&swap.id, SwapUpdateEvent::InvoiceSet);
        Ok(())
    }

    pub async fn create_reverse_swap(
        &self,
        args: CreateReverseSwapArgs,
    ) -> ServiceResult<CreatedReverseSwap> {
        let sending = self
            .currencies
            .get(&args.sending)
            .ok_or_else(|| ServiceError::CurrencyNotFound(args.sending.clone()))?;
        let receiving = self
            .currencies
            .get(&args.receiving)
            .ok_or_else(|| ServiceError::CurrencyNotFound(args.receiving.clone()))?;

        let lightning = receiving.lightning_client()?;

        let routing_hints = match &args.routing_node {
            Some(node) => lightning.routing_hints(node).await?,
            None => Vec::new(),
        };

        let invoice = lightning
            .add_hold_invoice(
                args.preimage_hash,
                args.hold_invoice_amount,
                args.lightning_timeout_block_delta,
                &format!("Send to {} address", args.sending),
                &routing_hints,
            )
            .await?;

        let miner_fee_invoice = match args.prepay_miner_fee_invoice_amount {
            Some(amount) => Some(
                lightning
                    .add_invoice(
                        amount,
                        &format!("Miner fee for sending to {} address", args.sending),
                    )
                    .await?,
            ),
            None => None,
        };

        let id = Uuid::new_v4().to_string();
        let timeout_block_height =
            current_height(sending).await? + args.onchain_timeout_block_delta;

        let mut swap = ReverseSwap {
            id: id.clone(),
            pair: args.pair_id,
            order_side: args.order_side,
            preimage_hash: hex::encode(args.preimage_hash),
            invoice: invoice.clone(),
            miner_fee_invoice: miner_fee_invoice.clone(),
            onchain_amount: args.onchain_amount,
            hold_invoice_amount: args.hold_invoice_amount,
            percentage_fee: args.percentage_fee,
            prepay_miner_fee_onchain_amount: args.prepay_miner_fee_onchain_amount,
            lockup_address: String::new(),
            redeem_script: None,
            claim_public_key: None,
            claim_address: None,
            key_index: None,
            timeout_block_height,
            referral_id: args.referral_id,
            status: SwapUpdateEvent::SwapCreated,
            created_at: unix_time(),
        };

        let mut refund_address = None;
        match sending.kind {
            CurrencyKind::BitcoinLike => {
                let claim_public_key = args
                    .claim_public_key
                    .ok_or(ServiceError::UndefinedParameter("claimPublicKey"))?;

                let wallet = self.wallet(&args.sending)?;
                let key_index = self
                    .repository
                    .reserve_key_index(&args.sending)
                    .context("reserve key index")?;
                let keys = wallet.get_keys_by_index(key_index).await?;

                let builder = self.htlc_builder(&args.sending)?;
                let script = builder
                    .build(HtlcParams {
                        preimage_hash: &args.preimage_hash,
                        claim_public_key: &claim_public_key,
                        refund_public_key: &keys.public_key,
                        timeout_block_height,
                        witness_address: self.witness_address,
                    })
                    .context("build reverse swap HTLC")?;

                swap.lockup_address = script.lockup_address;
                swap.redeem_script = Some(script.redeem_script);
                swap.claim_public_key = Some(claim_public_key);
                swap.key_index = Some(key_index);
            }
            CurrencyKind::Ether | CurrencyKind::Erc20 => {
                let claim_address = args
                    .claim_address
                    .ok_or(ServiceError::UndefinedParameter("claimAddress"))?;
                swap.lockup_address = self.contract_address(sending.kind)?;
                swap.claim_address = Some(claim_address);
                if let Some(wallet) = self.wallets.get(&args.sending) {
                    refund_address = Some(wallet.get_address().await?);
                }
            }
        }

        self.repository
            .insert_reverse_swap(&swap)
            .context("persist reverse swap")?;

        tracing::info!(
            swap_id = %swap.id,
            pair = %swap.pair,
            onchain_amount = swap.onchain_amount,
            "created reverse swap"
        );

        Ok(CreatedReverseSwap {
            id,
            invoice,
            miner_fee_invoice,
            redeem_script: swap.redeem_script,
            lockup_address: swap.lockup_address,
            refund_address,
            timeout_block_height,
        })
    }

    /// Records the user's lockup transaction and emits the matching
    /// mempool or confirmed update.
    pub fn set_swap_lockup(
        &self,
        swap_id: &str,
        transaction_id: &str,
        onchain_amount: u64,
        confirmed: bool,
    ) -> ServiceResult<()> {
        let status = if confirmed {
            SwapUpdateEvent::TransactionConfirmed
        } else {
            SwapUpdateEvent::TransactionMempool
        };
        self.repository
            .set_swap_lockup_transaction(swap_id, transaction_id, onchain_amount, status)
            .context("persist lockup transaction")?;
        self.hub.emit(swap_id, status);
        Ok(())
    }

    pub fn update_swap_status(&self, swap_id: &str, status: SwapUpdateEvent) -> ServiceResult<()> {
        self.repository
            .update_swap_status(swap_id, status)
            .context("persist swap status")?;
        self.hub.emit(swap_id, status);
        Ok(())
    }

    pub fn update_reverse_swap_status(
        &self,
        swap_id: &str,
        status: SwapUpdateEvent,
    ) -> ServiceResult<()> {
        self.repository
            .update_reverse_swap_status(swap_id, status)
            .context("persist reverse swap status")?;
        self.hub.emit(swap_id, status);
        Ok(())
    }

    /// Rolls back a swap that never got its invoice, channel creation first.
    pub fn destroy_swap(&self, swap_id: &str) -> ServiceResult<()> {
        self.repository
            .destroy_channel_creation(swap_id)
            .context("destroy channel creation")?;
        self.repository
            .destroy_swap(swap_id)
            .context("destroy swap")?;
        tracing::warn!(swap_id = %swap_id, "rolled back swap");
        Ok(())
    }

    fn wallet(&self, symbol: &str) -> ServiceResult<&Arc<dyn Wallet>> {
        self.wallets
            .get(symbol)
            .ok_or_else(|| ServiceError::CurrencyNotFound(symbol.to_string()))
    }

    fn htlc_builder(&self, symbol: &str) -> ServiceResult<&Arc<dyn HtlcBuilder>> {
        self.htlc_builders
            .get(symbol)
            .ok_or_else(|| ServiceError::NotSupportedBySymbol(symbol.to_string()))
    }

    fn contract_address(&self, kind: CurrencyKind) -> ServiceResult<String> {
        let account = self
            .account
            .as_ref()
            .ok_or(ServiceError::EthereumNotEnabled)?;
        Ok(match kind {
            CurrencyKind::Erc20 => account.erc20_swap_address.clone(),
            _ => account.ether_swap_address.clone(),
        })
    }
}

async fn current_height(currency: &crate::currency::Currency) -> ServiceResult<u32> {
    let blocks = match currency.kind {
        CurrencyKind::BitcoinLike => {
            currency.chain_client()?.get_blockchain_info().await?.blocks
        }
        CurrencyKind::Ether | CurrencyKind::Erc20 => {
            currency.account_provider()?.get_block_number().await?
        }
    };
    u32::try_from(blocks)
        .map_err(|_| ServiceError::Upstream(anyhow::anyhow!("block height out of range: {blocks}")))
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
