use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::{ChannelCreation, ReverseSwap, Swap};
use crate::event::SwapUpdateEvent;
use crate::pairs::OrderSide;
use crate::referral::Referral;

/// SQLite-backed store for swaps, reverse swaps, channel creations,
/// referrals and the per-wallet HD key-index counters.
///
/// The unique indexes on `swaps.preimage_hash` and `swaps.invoice` are the
/// authoritative enforcement of the uniqueness invariants; callers translate
/// violations with [`unique_violation`].
#[derive(Debug)]
pub struct SwapRepository {
    conn: Mutex<Connection>,
}

/// The unique key an insert or update collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    SwapPreimageHash,
    SwapInvoice,
    ReferralRoutingNode,
}

/// Inspects an error chain for a SQLite unique-constraint violation.
pub fn unique_violation(err: &anyhow::Error) -> Option<UniqueKey> {
    let sqlite = err.downcast_ref::<rusqlite::Error>()?;
    let rusqlite::Error::SqliteFailure(failure, Some(message)) = sqlite else {
        return None;
    };
    if failure.code != rusqlite::ErrorCode::ConstraintViolation {
        return None;
    }

    if message.contains("swaps.preimage_hash") {
        Some(UniqueKey::SwapPreimageHash)
    } else if message.contains("swaps.invoice") {
        Some(UniqueKey::SwapInvoice)
    } else if message.contains("referrals.routing_node") {
        Some(UniqueKey::ReferralRoutingNode)
    } else {
        None
    }
}

impl SwapRepository {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create repository dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Issues the next HD key index for `symbol`. The counter is persisted
    /// before the index is handed out, so a crash cannot double-allocate.
    pub fn reserve_key_index(&self, symbol: &str) -> Result<u32> {
        let mut conn = self.conn.lock().expect("repository mutex poisoned");
        let tx = conn.transaction().context("begin key index transaction")?;

        tx.execute(
            "INSERT INTO key_indices (symbol, next_index) VALUES (?1, 0)
             ON CONFLICT(symbol) DO NOTHING",
            params![symbol],
        )
        .context("seed key index counter")?;

        let index: i64 = tx
            .query_row(
                "SELECT next_index FROM key_indices WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .context("read key index counter")?;

        tx.execute(
            "UPDATE key_indices SET next_index = next_index + 1 WHERE symbol = ?1",
            params![symbol],
        )
        .context("advance key index counter")?;

        tx.commit().context("commit key index transaction")?;
        u32::try_from(index).context("key index out of range")
    }

    pub fn insert_swap(&self, swap: &Swap) -> Result<()> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
INSERT INTO swaps (
  id, pair, order_side, preimage_hash,
  invoice, rate, expected_amount, percentage_fee, accept_zero_conf,
  onchain_amount, lockup_address, lockup_transaction_id, timeout_block_height,
  refund_public_key, claim_address, key_index, redeem_script,
  referral_id, status, created_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
  ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
)
"#,
                params![
                    &swap.id,
                    &swap.pair,
                    swap.order_side.as_str(),
                    &swap.preimage_hash,
                    swap.invoice.as_deref(),
                    swap.rate,
                    swap.expected_amount.map(|v| v as i64),
                    swap.percentage_fee.map(|v| v as i64),
                    swap.accept_zero_conf,
                    swap.onchain_amount.map(|v| v as i64),
                    &swap.lockup_address,
                    swap.lockup_transaction_id.as_deref(),
                    swap.timeout_block_height,
                    swap.refund_public_key.as_deref(),
                    swap.claim_address.as_deref(),
                    swap.key_index,
                    swap.redeem_script.as_deref(),
                    swap.referral_id.as_deref(),
                    swap.status.as_str(),
                    swap.created_at as i64,
                ],
            )
            .with_context(|| format!("insert swap {}", swap.id))?;
        Ok(())
    }

    pub fn get_swap(&self, id: &str) -> Result<Option<Swap>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                &format!("{SELECT_SWAP} WHERE id = ?1"),
                params![id],
                row_to_swap,
            )
            .optional()
            .with_context(|| format!("get swap {id}"))
    }

    pub fn get_swap_by_preimage_hash(&self, preimage_hash: &str) -> Result<Option<Swap>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                &format!("{SELECT_SWAP} WHERE preimage_hash = ?1"),
                params![preimage_hash],
                row_to_swap,
            )
            .optional()
            .with_context(|| format!("get swap by preimage hash {preimage_hash}"))
    }

    pub fn get_swap_by_invoice(&self, invoice: &str) -> Result<Option<Swap>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                &format!("{SELECT_SWAP} WHERE invoice = ?1"),
                params![invoice],
                row_to_swap,
            )
            .optional()
            .context("get swap by invoice")
    }

    pub fn find_swap_by_lockup_transaction_id(&self, transaction_id: &str) -> Result<Option<Swap>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                &format!("{SELECT_SWAP} WHERE lockup_transaction_id = ?1"),
                params![transaction_id],
                row_to_swap,
            )
            .optional()
            .with_context(|| format!("find swap by lockup transaction {transaction_id}"))
    }

    /// Binds the invoice and the values locked in with it. Only touches a
    /// swap whose invoice is still unset.
    pub fn set_swap_invoice(
        &self,
        id: &str,
        invoice: &str,
        expected_amount: u64,
        percentage_fee: u64,
        accept_zero_conf: bool,
        rate: f64,
    ) -> Result<()> {
        let rows = self
            .conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
UPDATE swaps
SET invoice = ?2,
    expected_amount = ?3,
    percentage_fee = ?4,
    accept_zero_conf = ?5,
    rate = ?6,
    status = ?7
WHERE id = ?1 AND invoice IS NULL
"#,
                params![
                    id,
                    invoice,
                    expected_amount as i64,
                    percentage_fee as i64,
                    accept_zero_conf,
                    rate,
                    SwapUpdateEvent::InvoiceSet.as_str(),
                ],
            )
            .with_context(|| format!("set invoice of swap {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found or invoice already set: {id}");
        Ok(())
    }

    pub fn set_swap_lockup_transaction(
        &self,
        id: &str,
        transaction_id: &str,
        onchain_amount: u64,
        status: SwapUpdateEvent,
    ) -> Result<()> {
        let rows = self
            .conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
UPDATE swaps
SET lockup_transaction_id = ?2,
    onchain_amount = ?3,
    status = ?4
WHERE id = ?1
"#,
                params![id, transaction_id, onchain_amount as i64, status.as_str()],
            )
            .with_context(|| format!("set lockup transaction of swap {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn update_swap_status(&self, id: &str, status: SwapUpdateEvent) -> Result<()> {
        let rows = self
            .conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                "UPDATE swaps SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .with_context(|| format!("update swap status {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn destroy_swap(&self, id: &str) -> Result<()> {
        let rows = self
            .conn
            .lock()
            .expect("repository mutex poisoned")
            .execute("DELETE FROM swaps WHERE id = ?1", params![id])
            .with_context(|| format!("destroy swap {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    pub fn insert_reverse_swap(&self, swap: &ReverseSwap) -> Result<()> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
INSERT INTO reverse_swaps (
  id, pair, order_side, preimage_hash,
  invoice, miner_fee_invoice,
  onchain_amount, hold_invoice_amount, percentage_fee, prepay_miner_fee_onchain_amount,
  lockup_address, redeem_script, claim_public_key, claim_address, key_index,
  timeout_block_height, referral_id, status, created_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
  ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
)
"#,
                params![
                    &swap.id,
                    &swap.pair,
                    swap.order_side.as_str(),
                    &swap.preimage_hash,
                    &swap.invoice,
                    swap.miner_fee_invoice.as_deref(),
                    swap.onchain_amount as i64,
                    swap.hold_invoice_amount as i64,
                    swap.percentage_fee as i64,
                    swap.prepay_miner_fee_onchain_amount.map(|v| v as i64),
                    &swap.lockup_address,
                    swap.redeem_script.as_deref(),
                    swap.claim_public_key.as_deref(),
                    swap.claim_address.as_deref(),
                    swap.key_index,
                    swap.timeout_block_height,
                    swap.referral_id.as_deref(),
                    swap.status.as_str(),
                    swap.created_at as i64,
                ],
            )
            .with_context(|| format!("insert reverse swap {}", swap.id))?;
        Ok(())
    }

    pub fn get_reverse_swap(&self, id: &str) -> Result<Option<ReverseSwap>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                &format!("{SELECT_REVERSE_SWAP} WHERE id = ?1"),
                params![id],
                row_to_reverse_swap,
            )
            .optional()
            .with_context(|| format!("get reverse swap {id}"))
    }

    pub fn update_reverse_swap_status(&self, id: &str, status: SwapUpdateEvent) -> Result<()> {
        let rows = self
            .conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                "UPDATE reverse_swaps SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .with_context(|| format!("update reverse swap status {id}"))?;
        anyhow::ensure!(rows == 1, "reverse swap not found: {id}");
        Ok(())
    }

    pub fn insert_channel_creation(
        &self,
        swap_id: &str,
        channel: &ChannelCreation,
    ) -> Result<()> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
INSERT INTO channel_creations (swap_id, inbound_liquidity, private)
VALUES (?1, ?2, ?3)
"#,
                params![swap_id, channel.inbound_liquidity as i64, channel.private],
            )
            .with_context(|| format!("insert channel creation for swap {swap_id}"))?;
        Ok(())
    }

    pub fn get_channel_creation(&self, swap_id: &str) -> Result<Option<ChannelCreation>> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .query_row(
                "SELECT inbound_liquidity, private FROM channel_creations WHERE swap_id = ?1",
                params![swap_id],
                |row| {
                    let inbound_liquidity: i64 = row.get(0)?;
                    Ok(ChannelCreation {
                        inbound_liquidity: inbound_liquidity as u64,
                        private: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("get channel creation for swap {swap_id}"))
    }

    pub fn destroy_channel_creation(&self, swap_id: &str) -> Result<()> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                "DELETE FROM channel_creations WHERE swap_id = ?1",
                params![swap_id],
            )
            .with_context(|| format!("destroy channel creation for swap {swap_id}"))?;
        Ok(())
    }

    pub fn insert_referral(&self, referral: &Referral) -> Result<()> {
        self.conn
            .lock()
            .expect("repository mutex poisoned")
            .execute(
                r#"
INSERT INTO referrals (id, fee_share, routing_node, api_key, api_secret)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
                params![
                    &referral.id,
                    referral.fee_share as i64,
                    referral.routing_node.as_deref(),
                    &referral.api_key,
                    &referral.api_secret,
                ],
            )
            .with_context(|| format!("insert referral {}", referral.id))?;
        Ok(())
    }

    pub fn list_referrals(&self) -> Result<Vec<Referral>> {
        let conn = self.conn.lock().expect("repository mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT id, fee_share, routing_node, api_key, api_secret FROM referrals")
            .context("prepare list referrals")?;

        let rows = stmt
            .query_map([], |row| {
                let fee_share: i64 = row.get(1)?;
                Ok(Referral {
                    id: row.get(0)?,
                    fee_share: fee_share as u64,
                    routing_node: row.get(2)?,
                    api_key: row.get(3)?,
                    api_secret: row.get(4)?,
                })
            })
            .context("query list referrals")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read referral row")?);
        }
        Ok(out)
    }
}

const SELECT_SWAP: &str = r#"
SELECT
  id, pair, order_side, preimage_hash,
  invoice, rate, expected_amount, percentage_fee, accept_zero_conf,
  onchain_amount, lockup_address, lockup_transaction_id, timeout_block_height,
  refund_public_key, claim_address, key_index, redeem_script,
  referral_id, status, created_at
FROM swaps
"#;

const SELECT_REVERSE_SWAP: &str = r#"
SELECT
  id, pair, order_side, preimage_hash,
  invoice, miner_fee_invoice,
  onchain_amount, hold_invoice_amount, percentage_fee, prepay_miner_fee_onchain_amount,
  lockup_address, redeem_script, claim_public_key, claim_address, key_index,
  timeout_block_height, referral_id, status, created_at
FROM reverse_swaps
"#;

fn row_to_swap(row: &rusqlite::Row<'_>) -> rusqlite::Result<Swap> {
    Ok(Swap {
        id: row.get(0)?,
        pair: row.get(1)?,
        order_side: order_side_from_column(row, 2)?,
        preimage_hash: row.get(3)?,
        invoice: row.get(4)?,
        rate: row.get(5)?,
        expected_amount: opt_u64(row, 6)?,
        percentage_fee: opt_u64(row, 7)?,
        accept_zero_conf: row.get(8)?,
        onchain_amount: opt_u64(row, 9)?,
        lockup_address: row.get(10)?,
        lockup_transaction_id: row.get(11)?,
        timeout_block_height: to_u32(row, 12)?,
        refund_public_key: row.get(13)?,
        claim_address: row.get(14)?,
        key_index: opt_u32(row, 15)?,
        redeem_script: row.get(16)?,
        referral_id: row.get(17)?,
        status: status_from_column(row, 18)?,
        created_at: to_u64(row, 19)?,
    })
}

fn row_to_reverse_swap(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReverseSwap> {
    Ok(ReverseSwap {
        id: row.get(0)?,
        pair: row.get(1)?,
        order_side: order_side_from_column(row, 2)?,
        preimage_hash: row.get(3)?,
        invoice: row.get(4)?,
        miner_fee_invoice: row.get(5)?,
        onchain_amount: to_u64(row, 6)?,
        hold_invoice_amount: to_u64(row, 7)?,
        percentage_fee: to_u64(row, 8)?,
        prepay_miner_fee_onchain_amount: opt_u64(row, 9)?,
        lockup_address: row.get(10)?,
        redeem_script: row.get(11)?,
        claim_public_key: row.get(12)?,
        claim_address: row.get(13)?,
        key_index: opt_u32(row, 14)?,
        timeout_block_height: to_u32(row, 15)?,
        referral_id: row.get(16)?,
        status: status_from_column(row, 17)?,
        created_at: to_u64(row, 18)?,
    })
}

fn conversion_error(col: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Integer, message.into())
}

fn to_u64(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(col)?;
    u64::try_from(value).map_err(|_| conversion_error(col, format!("invalid amount {value}")))
}

fn opt_u64(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(col)?;
    value
        .map(|v| u64::try_from(v).map_err(|_| conversion_error(col, format!("invalid amount {v}"))))
        .transpose()
}

fn to_u32(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(col)?;
    u32::try_from(value).map_err(|_| conversion_error(col, format!("invalid height {value}")))
}

fn opt_u32(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<Option<u32>> {
    let value: Option<i64> = row.get(col)?;
    value
        .map(|v| u32::try_from(v).map_err(|_| conversion_error(col, format!("invalid index {v}"))))
        .transpose()
}

fn order_side_from_column(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<OrderSide> {
    let raw: String = row.get(col)?;
    OrderSide::parse(&raw).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown order side: {raw}").into(),
        )
    })
}

fn status_from_column(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<SwapUpdateEvent> {
    let raw: String = row.get(col)?;
    SwapUpdateEvent::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown swap status: {raw}").into(),
        )
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT PRIMARY KEY,
  pair TEXT NOT NULL,
  order_side TEXT NOT NULL,
  preimage_hash TEXT NOT NULL,
  invoice TEXT,
  rate REAL,
  expected_amount INTEGER,
  percentage_fee INTEGER,
  accept_zero_conf INTEGER,
  onchain_amount INTEGER,
  lockup_address TEXT NOT NULL,
  lockup_transaction_id TEXT,
  timeout_block_height INTEGER NOT NULL,
  refund_public_key TEXT,
  claim_address TEXT,
  key_index INTEGER,
  redeem_script TEXT,
  referral_id TEXT,
  status TEXT NOT NULL,
  created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS swaps_preimage_hash ON swaps(preimage_hash);
CREATE UNIQUE INDEX IF NOT EXISTS swaps_invoice ON swaps(invoice) WHERE invoice IS NOT NULL;
CREATE INDEX IF NOT EXISTS swaps_lockup_transaction_id_idx ON swaps(lockup_transaction_id);

CREATE TABLE IF NOT EXISTS reverse_swaps (
  id TEXT PRIMARY KEY,
  pair TEXT NOT NULL,
  order_side TEXT NOT NULL,
  preimage_hash TEXT NOT NULL,
  invoice TEXT NOT NULL,
  miner_fee_invoice TEXT,
  onchain_amount INTEGER NOT NULL,
  hold_invoice_amount INTEGER NOT NULL,
  percentage_fee INTEGER NOT NULL,
  prepay_miner_fee_onchain_amount INTEGER,
  lockup_address TEXT NOT NULL,
  redeem_script TEXT,
  claim_public_key TEXT,
  claim_address TEXT,
  key_index INTEGER,
  timeout_block_height INTEGER NOT NULL,
  referral_id TEXT,
  status TEXT NOT NULL,
  created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS reverse_swaps_preimage_hash_idx ON reverse_swaps(preimage_hash);

CREATE TABLE IF NOT EXISTS channel_creations (
  swap_id TEXT PRIMARY KEY,
  inbound_liquidity INTEGER NOT NULL,
  private INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS referrals (
  id TEXT PRIMARY KEY,
  fee_share INTEGER NOT NULL,
  routing_node TEXT UNIQUE,
  api_key TEXT NOT NULL,
  api_secret TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS key_indices (
  symbol TEXT PRIMARY KEY,
  next_index INTEGER NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}
