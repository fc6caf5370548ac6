use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use ln_chain_swap::chain::{
    AccountProvider, BlockchainInfo, ChainClient, ChainRpcError, GWEI_DECIMALS, NetworkInfo,
};
use ln_chain_swap::lightning::{
    Channel, LightningClient, LightningInfo, PaymentResponse, RoutingHint,
};
use ln_chain_swap::wallet::{
    HtlcBuilder, HtlcParams, HtlcScript, KeyPair, SendResponse, Wallet, WalletBalance,
};

pub struct MockChainClient {
    pub blocks: Mutex<u64>,
    pub fee_sat_per_vbyte: Mutex<f64>,
    pub raw_transactions: Mutex<HashMap<String, String>>,
    pub broadcast_error: Mutex<Option<ChainRpcError>>,
    pub broadcasts: Mutex<Vec<String>>,
    pub fail_info: Mutex<bool>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(100),
            fee_sat_per_vbyte: Mutex::new(2.0),
            raw_transactions: Mutex::new(HashMap::new()),
            broadcast_error: Mutex::new(None),
            broadcasts: Mutex::new(Vec::new()),
            fail_info: Mutex::new(false),
        }
    }

    pub fn set_blocks(&self, blocks: u64) {
        *self.blocks.lock().unwrap() = blocks;
    }

    pub fn set_fee(&self, sat_per_vbyte: f64) {
        *self.fee_sat_per_vbyte.lock().unwrap() = sat_per_vbyte;
    }

    pub fn reject_broadcasts_with(&self, error: ChainRpcError) {
        *self.broadcast_error.lock().unwrap() = Some(error);
    }

    pub fn fail_info_calls(&self) {
        *self.fail_info.lock().unwrap() = true;
    }

    pub fn insert_raw_transaction(&self, transaction_id: &str, hex: &str) {
        self.raw_transactions
            .lock()
            .unwrap()
            .insert(transaction_id.to_string(), hex.to_string());
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        if *self.fail_info.lock().unwrap() {
            anyhow::bail!("connection refused");
        }
        Ok(NetworkInfo {
            version: 270_000,
            connections: 8,
        })
    }

    async fn get_blockchain_info(&self) -> Result<BlockchainInfo> {
        if *self.fail_info.lock().unwrap() {
            anyhow::bail!("connection refused");
        }
        let blocks = *self.blocks.lock().unwrap();
        Ok(BlockchainInfo {
            blocks,
            scanned_blocks: blocks,
        })
    }

    async fn estimate_fee(&self, _blocks: u32) -> Result<f64> {
        Ok(*self.fee_sat_per_vbyte.lock().unwrap())
    }

    async fn get_raw_transaction(&self, transaction_id: &str) -> Result<String> {
        self.raw_transactions
            .lock()
            .unwrap()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("transaction not found: {transaction_id}"))
    }

    async fn send_raw_transaction(&self, transaction_hex: &str) -> Result<String> {
        if let Some(error) = self.broadcast_error.lock().unwrap().clone() {
            return Err(anyhow::Error::new(error));
        }
        self.broadcasts
            .lock()
            .unwrap()
            .push(transaction_hex.to_string());
        Ok(format!("broadcast-{}", transaction_hex.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInvoiceCall {
    pub preimage_hash: [u8; 32],
    pub amount_sat: u64,
    pub cltv_expiry: u32,
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceCall {
    pub amount_sat: u64,
    pub memo: String,
}

pub struct MockLightningClient {
    symbol: String,
    pub channels: Mutex<Vec<Channel>>,
    pub hold_invoices: Mutex<Vec<HoldInvoiceCall>>,
    pub invoices: Mutex<Vec<InvoiceCall>>,
    pub hints: Mutex<HashMap<String, Vec<RoutingHint>>>,
}

impl MockLightningClient {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            channels: Mutex::new(Vec::new()),
            hold_invoices: Mutex::new(Vec::new()),
            invoices: Mutex::new(Vec::new()),
            hints: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_channels(&self, channels: Vec<(u64, u64)>) {
        *self.channels.lock().unwrap() = channels
            .into_iter()
            .map(|(local_balance, remote_balance)| Channel {
                remote_pubkey: "02peer".to_string(),
                local_balance,
                remote_balance,
            })
            .collect();
    }

    pub fn last_hold_invoice(&self) -> HoldInvoiceCall {
        self.hold_invoices
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no hold invoice was created")
    }

    pub fn last_invoice(&self) -> InvoiceCall {
        self.invoices
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no invoice was created")
    }
}

#[async_trait]
impl LightningClient for MockLightningClient {
    async fn get_info(&self) -> Result<LightningInfo> {
        Ok(LightningInfo {
            version: "0.18.0-beta".to_string(),
            block_height: 100,
            num_active_channels: 3,
            num_inactive_channels: 1,
            num_pending_channels: 0,
            identity_pubkey: format!("02{}node", self.symbol.to_lowercase()),
            uris: vec![format!(
                "02{}node@127.0.0.1:9735",
                self.symbol.to_lowercase()
            )],
        })
    }

    async fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn send_payment(&self, invoice: &str) -> Result<PaymentResponse> {
        Ok(PaymentResponse {
            payment_hash: format!("hash-{}", invoice.len()),
            payment_preimage: "00".repeat(32),
            fee_msat: 1000,
        })
    }

    async fn add_hold_invoice(
        &self,
        preimage_hash: [u8; 32],
        amount_sat: u64,
        cltv_expiry: u32,
        memo: &str,
        _routing_hints: &[RoutingHint],
    ) -> Result<String> {
        self.hold_invoices.lock().unwrap().push(HoldInvoiceCall {
            preimage_hash,
            amount_sat,
            cltv_expiry,
            memo: memo.to_string(),
        });
        Ok(format!("lnhold{}n1{}", amount_sat, hex::encode(preimage_hash)))
    }

    async fn add_invoice(&self, amount_sat: u64, memo: &str) -> Result<String> {
        self.invoices.lock().unwrap().push(InvoiceCall {
            amount_sat,
            memo: memo.to_string(),
        });
        Ok(format!("lnprepay{amount_sat}n1"))
    }

    async fn routing_hints(&self, routing_node: &str) -> Result<Vec<RoutingHint>> {
        Ok(self
            .hints
            .lock()
            .unwrap()
            .get(routing_node)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct MockWallet {
    symbol: String,
    pub balance: Mutex<WalletBalance>,
    pub sends: Mutex<Vec<(String, u64)>>,
    pub sweeps: Mutex<Vec<String>>,
}

impl MockWallet {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            balance: Mutex::new(WalletBalance {
                total: 0,
                confirmed: 0,
                unconfirmed: 0,
            }),
            sends: Mutex::new(Vec::new()),
            sweeps: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, total: u64, confirmed: u64, unconfirmed: u64) {
        *self.balance.lock().unwrap() = WalletBalance {
            total,
            confirmed,
            unconfirmed,
        };
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn get_balance(&self) -> Result<WalletBalance> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_address(&self) -> Result<String> {
        Ok(format!("{}-address", self.symbol.to_lowercase()))
    }

    async fn get_keys_by_index(&self, index: u32) -> Result<KeyPair> {
        Ok(KeyPair {
            public_key: format!("02{index:062x}"),
            private_key: format!("{index:064x}"),
        })
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: u64,
        _fee: Option<f64>,
    ) -> Result<SendResponse> {
        self.sends
            .lock()
            .unwrap()
            .push((address.to_string(), amount));
        Ok(SendResponse {
            transaction_id: format!("send-{amount}"),
            vout: Some(1),
        })
    }

    async fn sweep_wallet(&self, address: &str, _fee: Option<f64>) -> Result<SendResponse> {
        self.sweeps.lock().unwrap().push(address.to_string());
        Ok(SendResponse {
            transaction_id: "sweep".to_string(),
            vout: None,
        })
    }
}

pub struct MockHtlcBuilder {
    symbol: String,
}

impl MockHtlcBuilder {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
        }
    }
}

impl HtlcBuilder for MockHtlcBuilder {
    fn build(&self, params: HtlcParams<'_>) -> Result<HtlcScript> {
        Ok(HtlcScript {
            redeem_script: format!(
                "a820{}8876{}{:08x}b175{}ac",
                hex::encode(params.preimage_hash),
                params.claim_public_key,
                params.timeout_block_height,
                params.refund_public_key,
            ),
            lockup_address: format!(
                "{}1qlockup{:x}",
                self.symbol.to_lowercase(),
                params.timeout_block_height
            ),
        })
    }
}

pub struct MockAccountProvider {
    pub block_number: Mutex<u64>,
    pub gas_price_wei: Mutex<u128>,
}

impl MockAccountProvider {
    pub fn new() -> Self {
        Self {
            block_number: Mutex::new(5000),
            gas_price_wei: Mutex::new(30 * GWEI_DECIMALS),
        }
    }

    pub fn set_gas_price_gwei(&self, gwei: u128) {
        *self.gas_price_wei.lock().unwrap() = gwei * GWEI_DECIMALS;
    }
}

#[async_trait]
impl AccountProvider for MockAccountProvider {
    async fn get_block_number(&self) -> Result<u64> {
        Ok(*self.block_number.lock().unwrap())
    }

    async fn get_gas_price(&self) -> Result<u128> {
        Ok(*self.gas_price_wei.lock().unwrap())
    }
}
