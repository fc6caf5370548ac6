use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletBalance {
    pub total: u64,
    pub confirmed: u64,
    pub unconfirmed: u64,
}

/// HD keypair at a derivation index, hex encoded.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Clone)]
pub struct SendResponse {
    pub transaction_id: String,
    pub vout: Option<u32>,
}

/// Key derivation and coin movement for one currency.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn get_balance(&self) -> Result<WalletBalance>;
    async fn get_address(&self) -> Result<String>;
    async fn get_keys_by_index(&self, index: u32) -> Result<KeyPair>;

    async fn send_to_address(
        &self,
        address: &str,
        amount: u64,
        fee: Option<f64>,
    ) -> Result<SendResponse>;

    /// Spends the whole wallet balance to `address`.
    async fn sweep_wallet(&self, address: &str, fee: Option<f64>) -> Result<SendResponse>;
}

/// Builds the HTLC lockup output for a UTXO chain. Script assembly itself
/// lives with the chain integration; the swap logic only consumes the
/// resulting script and address.
pub trait HtlcBuilder: Send + Sync {
    fn build(&self, params: HtlcParams<'_>) -> Result<HtlcScript>;
}

pub struct HtlcParams<'a> {
    pub preimage_hash: &'a [u8; 32],
    pub claim_public_key: &'a str,
    pub refund_public_key: &'a str,
    pub timeout_block_height: u32,
    /// Wrap the redeem script into a P2WSH output instead of P2SH.
    pub witness_address: bool,
}

#[derive(Debug, Clone)]
pub struct HtlcScript {
    pub redeem_script: String,
    pub lockup_address: String,
}
