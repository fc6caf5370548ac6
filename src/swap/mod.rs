pub mod manager;
pub mod repository;

use serde::{Deserialize, Serialize};

use crate::event::SwapUpdateEvent;
use crate::pairs::OrderSide;

/// A forward submarine swap: the user locks coins on-chain, the service
/// settles a Lightning invoice once the lockup confirms.
///
/// `invoice`, `rate`, `expected_amount` and `percentage_fee` stay unset
/// until the invoice is bound and are never overwritten afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    pub id: String,
    pub pair: String,
    pub order_side: OrderSide,
    pub preimage_hash: String,

    pub invoice: Option<String>,
    pub rate: Option<f64>,
    pub expected_amount: Option<u64>,
    pub percentage_fee: Option<u64>,
    pub accept_zero_conf: Option<bool>,

    pub onchain_amount: Option<u64>,
    pub lockup_address: String,
    pub lockup_transaction_id: Option<String>,
    pub timeout_block_height: u32,

    pub refund_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub key_index: Option<u32>,
    pub redeem_script: Option<String>,

    pub referral_id: Option<String>,
    pub status: SwapUpdateEvent,
    pub created_at: u64,
}

/// A reverse swap: the user pays a hold invoice, the service locks coins
/// on-chain for the user to claim with the revealed preimage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseSwap {
    pub id: String,
    pub pair: String,
    pub order_side: OrderSide,
    pub preimage_hash: String,

    pub invoice: String,
    pub miner_fee_invoice: Option<String>,

    pub onchain_amount: u64,
    pub hold_invoice_amount: u64,
    pub percentage_fee: u64,
    pub prepay_miner_fee_onchain_amount: Option<u64>,

    pub lockup_address: String,
    pub redeem_script: Option<String>,
    pub claim_public_key: Option<String>,
    pub claim_address: Option<String>,
    pub key_index: Option<u32>,
    pub timeout_block_height: u32,

    pub referral_id: Option<String>,
    pub status: SwapUpdateEvent,
    pub created_at: u64,
}

/// Channel opened alongside a forward swap. Lives and dies with its swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCreation {
    pub inbound_liquidity: u64,
    pub private: bool,
}
