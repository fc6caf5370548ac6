use anyhow::{Context as _, Result};

use ln_chain_swap::event::SwapUpdateEvent;
use ln_chain_swap::pairs::OrderSide;
use ln_chain_swap::referral::Referral;
use ln_chain_swap::swap::repository::{SwapRepository, UniqueKey, unique_violation};
use ln_chain_swap::swap::{ChannelCreation, ReverseSwap, Swap};

fn sample_swap(id: &str, preimage_hash: &str) -> Swap {
    Swap {
        id: id.to_string(),
        pair: "BTC/BTC".to_string(),
        order_side: OrderSide::Buy,
        preimage_hash: preimage_hash.to_string(),
        invoice: None,
        rate: None,
        expected_amount: None,
        percentage_fee: None,
        accept_zero_conf: None,
        onchain_amount: None,
        lockup_address: format!("bcrt1q{id}"),
        lockup_transaction_id: None,
        timeout_block_height: 140,
        refund_public_key: Some("03aa".to_string()),
        claim_address: None,
        key_index: Some(0),
        redeem_script: Some("a914".to_string()),
        referral_id: None,
        status: SwapUpdateEvent::SwapCreated,
        created_at: 1_700_000_000,
    }
}

fn sample_reverse_swap(id: &str) -> ReverseSwap {
    ReverseSwap {
        id: id.to_string(),
        pair: "BTC/BTC".to_string(),
        order_side: OrderSide::Buy,
        preimage_hash: format!("hash:{id}"),
        invoice: format!("invoice:{id}"),
        miner_fee_invoice: None,
        onchain_amount: 97_680,
        hold_invoice_amount: 100_000,
        percentage_fee: 2_000,
        prepay_miner_fee_onchain_amount: None,
        lockup_address: format!("bcrt1q{id}"),
        redeem_script: Some("a914".to_string()),
        claim_public_key: Some("02bb".to_string()),
        claim_address: None,
        key_index: Some(1),
        timeout_block_height: 260,
        referral_id: None,
        status: SwapUpdateEvent::SwapCreated,
        created_at: 1_700_000_000,
    }
}

fn open_repository() -> Result<(tempfile::TempDir, SwapRepository)> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let repository =
        SwapRepository::open(dir.path().join("swaps.sqlite3")).context("open repository")?;
    Ok((dir, repository))
}

#[test]
fn swap_insert_lookup_update() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    let swap = sample_swap("swap-a", "aa".repeat(32).as_str());
    repository.insert_swap(&swap).context("insert swap-a")?;

    let got = repository
        .get_swap("swap-a")
        .context("get swap-a")?
        .context("swap-a missing")?;
    assert_eq!(got.pair, "BTC/BTC");
    assert_eq!(got.status, SwapUpdateEvent::SwapCreated);
    assert!(got.invoice.is_none());

    let by_hash = repository
        .get_swap_by_preimage_hash(&swap.preimage_hash)
        .context("get by preimage hash")?
        .context("missing by preimage hash")?;
    assert_eq!(by_hash.id, "swap-a");

    repository
        .set_swap_invoice("swap-a", "lnbcrt1invoice", 100_002, 1, true, 1.0)
        .context("set invoice")?;
    let got = repository
        .get_swap("swap-a")
        .context("get after invoice")?
        .context("missing after invoice")?;
    assert_eq!(got.invoice.as_deref(), Some("lnbcrt1invoice"));
    assert_eq!(got.expected_amount, Some(100_002));
    assert_eq!(got.status, SwapUpdateEvent::InvoiceSet);

    // A second bind must not touch the record.
    let err = repository
        .set_swap_invoice("swap-a", "lnbcrt1other", 1, 1, false, 1.0)
        .unwrap_err();
    assert!(err.to_string().contains("invoice already set"));

    repository
        .set_swap_lockup_transaction("swap-a", "ff00", 100_002, SwapUpdateEvent::TransactionMempool)
        .context("set lockup")?;
    let got = repository
        .find_swap_by_lockup_transaction_id("ff00")
        .context("find by lockup")?
        .context("missing by lockup")?;
    assert_eq!(got.onchain_amount, Some(100_002));

    repository
        .destroy_swap("swap-a")
        .context("destroy swap-a")?;
    assert!(repository.get_swap("swap-a")?.is_none());

    Ok(())
}

#[test]
fn unique_keys_are_enforced() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    let swap = sample_swap("swap-a", "aa");
    repository.insert_swap(&swap)?;

    let mut duplicate = sample_swap("swap-b", "aa");
    let err = repository.insert_swap(&duplicate).unwrap_err();
    assert_eq!(unique_violation(&err), Some(UniqueKey::SwapPreimageHash));

    duplicate.preimage_hash = "bb".to_string();
    repository.insert_swap(&duplicate)?;

    repository.set_swap_invoice("swap-a", "lnbcrt1dup", 1, 1, false, 1.0)?;
    let err = repository
        .set_swap_invoice("swap-b", "lnbcrt1dup", 1, 1, false, 1.0)
        .unwrap_err();
    assert_eq!(unique_violation(&err), Some(UniqueKey::SwapInvoice));

    Ok(())
}

#[test]
fn key_indices_are_monotonic_per_symbol() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    assert_eq!(repository.reserve_key_index("BTC")?, 0);
    assert_eq!(repository.reserve_key_index("BTC")?, 1);
    assert_eq!(repository.reserve_key_index("LTC")?, 0);
    assert_eq!(repository.reserve_key_index("BTC")?, 2);

    Ok(())
}

#[test]
fn reverse_swap_round_trip() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    let swap = sample_reverse_swap("reverse-a");
    repository.insert_reverse_swap(&swap)?;

    let got = repository
        .get_reverse_swap("reverse-a")?
        .context("reverse-a missing")?;
    assert_eq!(got.hold_invoice_amount, 100_000);
    assert_eq!(got.onchain_amount, 97_680);
    assert_eq!(got.claim_public_key.as_deref(), Some("02bb"));

    repository.update_reverse_swap_status("reverse-a", SwapUpdateEvent::InvoiceSettled)?;
    let got = repository
        .get_reverse_swap("reverse-a")?
        .context("reverse-a missing after update")?;
    assert_eq!(got.status, SwapUpdateEvent::InvoiceSettled);

    let err = repository
        .update_reverse_swap_status("missing", SwapUpdateEvent::SwapExpired)
        .unwrap_err();
    assert!(err.to_string().contains("reverse swap not found"));

    Ok(())
}

#[test]
fn channel_creations_live_with_their_swap() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    repository.insert_swap(&sample_swap("swap-a", "aa"))?;
    repository.insert_channel_creation(
        "swap-a",
        &ChannelCreation {
            inbound_liquidity: 25,
            private: true,
        },
    )?;

    let channel = repository
        .get_channel_creation("swap-a")?
        .context("channel creation missing")?;
    assert_eq!(channel.inbound_liquidity, 25);
    assert!(channel.private);

    repository.destroy_channel_creation("swap-a")?;
    assert!(repository.get_channel_creation("swap-a")?.is_none());

    // Destroying without a channel creation is a no-op.
    repository.destroy_channel_creation("swap-a")?;

    Ok(())
}

#[test]
fn referrals_round_trip_and_reject_duplicate_routing_nodes() -> Result<()> {
    let (_dir, repository) = open_repository()?;

    let referral = Referral {
        id: "partner".to_string(),
        fee_share: 20,
        routing_node: Some("02abc".to_string()),
        api_key: "key".to_string(),
        api_secret: "secret".to_string(),
    };
    repository.insert_referral(&referral)?;

    let listed = repository.list_referrals()?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "partner");
    assert_eq!(listed[0].routing_node.as_deref(), Some("02abc"));

    let clash = Referral {
        id: "other".to_string(),
        ..referral
    };
    let err = repository.insert_referral(&clash).unwrap_err();
    assert_eq!(unique_violation(&err), Some(UniqueKey::ReferralRoutingNode));

    Ok(())
}
