use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

/// Builds a signed regtest BOLT11 invoice for tests that need one the
/// service can actually decode.
pub fn signed_invoice(preimage_hash: [u8; 32], amount_sat: u64) -> String {
    let secp = Secp256k1::new();
    let key = SecretKey::from_slice(&[0x42; 32]).expect("valid secret key");

    InvoiceBuilder::new(Currency::Regtest)
        .description("swap invoice".to_string())
        .payment_hash(sha256::Hash::from_byte_array(preimage_hash))
        .payment_secret(PaymentSecret([0x11; 32]))
        .amount_milli_satoshis(amount_sat * 1000)
        .current_timestamp()
        .min_final_cltv_expiry_delta(80)
        .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
        .expect("sign invoice")
        .to_string()
}
