use std::collections::HashMap;
use std::sync::Arc;

use sha3::{Digest, Keccak256};

use crate::chain::{AccountProvider, ChainClient};
use crate::error::{ServiceError, ServiceResult};
use crate::lightning::LightningClient;

/// What kind of ledger a currency settles on. The kind decides which claim
/// and refund credentials a swap needs: public keys for UTXO chains,
/// addresses for account chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyKind {
    BitcoinLike,
    Ether,
    Erc20,
}

impl CurrencyKind {
    pub fn is_account_based(self) -> bool {
        matches!(self, Self::Ether | Self::Erc20)
    }
}

/// A configured currency and its optional capabilities.
#[derive(Clone)]
pub struct Currency {
    pub symbol: String,
    pub network: String,
    pub kind: CurrencyKind,
    pub chain: Option<Arc<dyn ChainClient>>,
    pub lightning: Option<Arc<dyn LightningClient>>,
    pub provider: Option<Arc<dyn AccountProvider>>,
}

impl Currency {
    pub fn chain_client(&self) -> ServiceResult<&Arc<dyn ChainClient>> {
        self.chain
            .as_ref()
            .ok_or_else(|| ServiceError::NotSupportedBySymbol(self.symbol.clone()))
    }

    pub fn lightning_client(&self) -> ServiceResult<&Arc<dyn LightningClient>> {
        self.lightning
            .as_ref()
            .ok_or_else(|| ServiceError::NoLndClient(self.symbol.clone()))
    }

    pub fn account_provider(&self) -> ServiceResult<&Arc<dyn AccountProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| ServiceError::NotSupportedBySymbol(self.symbol.clone()))
    }
}

pub type CurrencyMap = HashMap<String, Currency>;

pub fn currency_map(currencies: Vec<Currency>) -> CurrencyMap {
    currencies
        .into_iter()
        .map(|currency| (currency.symbol.clone(), currency))
        .collect()
}

/// Canonicalizes an account-chain address to its EIP-55 checksum form.
///
/// Mixed-case inputs must already carry a valid checksum; all-lower and
/// all-upper inputs are accepted and checksummed.
pub fn checksum_address(address: &str) -> ServiceResult<String> {
    let stripped = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or(ServiceError::InvalidEthereumAddress)?;

    if stripped.len() != 40 || !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ServiceError::InvalidEthereumAddress);
    }

    let lower = stripped.to_ascii_lowercase();
    let digest = Keccak256::digest(lower.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    let mixed_case = stripped.chars().any(|c| c.is_ascii_lowercase())
        && stripped.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case && checksummed[2..] != *stripped {
        return Err(ServiceError::InvalidEthereumAddress);
    }

    Ok(checksummed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn checksums_lowercase_address() {
        let lower = CHECKSUMMED.to_ascii_lowercase();
        assert_eq!(checksum_address(&lower).unwrap(), CHECKSUMMED);
    }

    #[test]
    fn keeps_valid_checksum() {
        assert_eq!(checksum_address(CHECKSUMMED).unwrap(), CHECKSUMMED);
    }

    #[test]
    fn rejects_broken_checksum() {
        let broken = CHECKSUMMED.replace("aA", "Aa");
        assert!(matches!(
            checksum_address(&broken),
            Err(ServiceError::InvalidEthereumAddress)
        ));
    }

    #[test]
    fn rejects_malformed_addresses() {
        for address in ["", "0x1234", "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"] {
            assert!(matches!(
                checksum_address(address),
                Err(ServiceError::InvalidEthereumAddress)
            ));
        }
    }
}
