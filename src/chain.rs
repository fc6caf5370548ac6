use anyhow::Result;
use async_trait::async_trait;

/// Satoshis per coin, the base unit every amount in the API is quoted in.
pub const COIN: u64 = 100_000_000;

pub const GWEI_DECIMALS: u128 = 1_000_000_000;
pub const ETHER_DECIMALS: u128 = 1_000_000_000_000_000_000;

/// Gas budget used to size the prepay miner fee for account-chain lockups.
pub const ETHEREUM_PREPAY_MINER_FEE_GAS_LIMIT: u128 = 100_000;

/// Block target used for fee estimations when the caller does not set one.
pub const DEFAULT_FEE_ESTIMATION_BLOCKS: u32 = 2;

/// Prefix of the verify-flag rejection a chain daemon returns when a refund
/// is broadcast before its locktime.
pub const LOCKTIME_REJECTION: &str =
    "non-mandatory-script-verify-flag (Locktime requirement not satisfied)";

/// Structured RPC rejection from a chain daemon.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ChainRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub version: u64,
    pub connections: u32,
}

#[derive(Debug, Clone)]
pub struct BlockchainInfo {
    pub blocks: u64,
    pub scanned_blocks: u64,
}

/// RPC surface of a UTXO chain daemon.
///
/// `send_raw_transaction` rejections carry a [`ChainRpcError`] in the error
/// chain so callers can match on the daemon's error code.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo>;

    /// Fee estimation in sat/vByte for confirmation within `blocks`.
    async fn estimate_fee(&self, blocks: u32) -> Result<f64>;

    async fn get_raw_transaction(&self, transaction_id: &str) -> Result<String>;
    async fn send_raw_transaction(&self, transaction_hex: &str) -> Result<String>;
}

/// RPC surface of an account-chain node.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn get_block_number(&self) -> Result<u64>;

    /// Current gas price in wei.
    async fn get_gas_price(&self) -> Result<u128>;
}

/// The account-chain integration: one provider plus the swap contracts
/// deployed on it. Absent when the service runs without account chains.
pub struct AccountChainManager {
    pub provider: std::sync::Arc<dyn AccountProvider>,
    pub chain_id: u64,
    pub ether_swap_address: String,
    pub erc20_swap_address: String,
    /// ERC20 token contract addresses by currency symbol.
    pub tokens: std::collections::HashMap<String, String>,
}

/// Gas cost of `gas` units at `gas_price_wei`, expressed in the 10^-8 coin
/// units the rest of the API uses.
pub fn account_chain_cost(gas: u128, gas_price_wei: u128) -> u64 {
    (gas * gas_price_wei * u128::from(COIN) / ETHER_DECIMALS) as u64
}
