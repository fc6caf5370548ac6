pub mod invoice;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct LightningInfo {
    pub version: String,
    pub block_height: u32,
    pub num_active_channels: u32,
    pub num_inactive_channels: u32,
    pub num_pending_channels: u32,
    pub identity_pubkey: String,
    pub uris: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub remote_pubkey: String,
    pub local_balance: u64,
    pub remote_balance: u64,
}

#[derive(Debug, Clone)]
pub struct PaymentResponse {
    pub payment_hash: String,
    pub payment_preimage: String,
    pub fee_msat: u64,
}

/// A single hop hint embedded into an invoice to steer routing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingHint {
    pub node_id: String,
    pub channel_id: u64,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub cltv_expiry_delta: u32,
}

/// RPC surface of a Lightning node.
#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_info(&self) -> Result<LightningInfo>;
    async fn list_channels(&self) -> Result<Vec<Channel>>;
    async fn send_payment(&self, invoice: &str) -> Result<PaymentResponse>;

    /// Creates a hold invoice that settles only once the preimage is
    /// revealed by the on-chain side.
    async fn add_hold_invoice(
        &self,
        preimage_hash: [u8; 32],
        amount_sat: u64,
        cltv_expiry: u32,
        memo: &str,
        routing_hints: &[RoutingHint],
    ) -> Result<String>;

    /// Creates a plain invoice, used for the prepay miner fee.
    async fn add_invoice(&self, amount_sat: u64, memo: &str) -> Result<String>;

    /// Hop hints for channels shared with `routing_node`.
    async fn routing_hints(&self, routing_node: &str) -> Result<Vec<RoutingHint>>;
}
