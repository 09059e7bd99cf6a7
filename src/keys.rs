//! Key Pair Utility
//!
//! Every deposit address owns an independently generated secp256k1 scalar
//! (no HD derivation). The same scalar is encoded differently per chain
//! family:
//! - UTXO: P2PKH over the uncompressed public key (0x00 mainnet / 0x6F testnet)
//! - Account-gas: `0x` + last 20 bytes of keccak256(pubkey[1..]), lower-case hex
//! - Account-resource: base58check(0x41 ++ last 20 bytes of keccak256(pubkey[1..]))
//!
//! SECURITY: keys are handled as plaintext hex and persisted as such.

use bitcoin::secp256k1::{SecretKey, SECP256K1};
use k256::ecdsa::SigningKey;
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

/// Tron address version byte
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Key handling errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid key hex: {0}")]
    InvalidHex(String),

    #[error("key must be 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("scalar out of range")]
    InvalidScalar,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// A raw secp256k1 private scalar
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    bytes: [u8; 32],
}

impl PrivateKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self {
            bytes: secret.secret_bytes(),
        }
    }

    /// Parse a hex scalar, with or without `0x`
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).map_err(|e| KeyError::InvalidHex(e.to_string()))?;

        if raw.len() != 32 {
            return Err(KeyError::InvalidLength(raw.len()));
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidScalar)?;

        Ok(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// Key for `bitcoin`/`secp256k1` signing
    pub fn secp_secret(&self) -> Result<SecretKey, KeyError> {
        SecretKey::from_slice(&self.bytes).map_err(|_| KeyError::InvalidScalar)
    }

    /// Key for `k256` signing
    pub fn signing_key(&self) -> Result<SigningKey, KeyError> {
        SigningKey::from_slice(&self.bytes).map_err(|_| KeyError::InvalidScalar)
    }

    /// SEC1 uncompressed public key (65 bytes, leading 0x04)
    pub fn uncompressed_public_key(&self) -> Result<[u8; 65], KeyError> {
        let secret = self.secp_secret()?;
        Ok(secret.public_key(SECP256K1).serialize_uncompressed())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Chain-specific address encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEncoding {
    P2pkh { testnet: bool },
    Ethereum,
    Tron,
}

impl AddressEncoding {
    /// Encode the address of `key`
    pub fn derive(&self, key: &PrivateKey) -> Result<String, KeyError> {
        match self {
            AddressEncoding::P2pkh { testnet } => {
                let network = if *testnet {
                    bitcoin::Network::Testnet
                } else {
                    bitcoin::Network::Bitcoin
                };
                btc_p2pkh_address(key, network)
            }
            AddressEncoding::Ethereum => eth_address(key),
            AddressEncoding::Tron => tron_address(key),
        }
    }

    /// Canonical form used for storage and matching
    pub fn normalize(&self, address: &str) -> String {
        match self {
            AddressEncoding::Ethereum => address.trim().to_lowercase(),
            _ => address.trim().to_string(),
        }
    }

    /// Check that `address` is well-formed for this encoding and return it
    /// in canonical form
    pub fn validate(&self, address: &str) -> Result<String, KeyError> {
        let canonical = self.normalize(address);
        let invalid = || KeyError::InvalidAddress(address.to_string());

        match self {
            AddressEncoding::P2pkh { testnet } => {
                let network = if *testnet {
                    bitcoin::Network::Testnet
                } else {
                    bitcoin::Network::Bitcoin
                };
                canonical
                    .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
                    .map_err(|_| invalid())?
                    .require_network(network)
                    .map_err(|_| invalid())?;
            }
            AddressEncoding::Ethereum => {
                let digits = canonical.strip_prefix("0x").ok_or_else(invalid)?;
                if digits.len() != 40 || hex::decode(digits).is_err() {
                    return Err(invalid());
                }
            }
            AddressEncoding::Tron => {
                tron_base58_to_bytes(&canonical)?;
            }
        }

        Ok(canonical)
    }
}

/// P2PKH address over the uncompressed public key
pub fn btc_p2pkh_address(key: &PrivateKey, network: bitcoin::Network) -> Result<String, KeyError> {
    let pubkey = btc_public_key(key)?;
    Ok(bitcoin::Address::p2pkh(pubkey.pubkey_hash(), network).to_string())
}

/// Uncompressed `bitcoin` public key for P2PKH spending
pub fn btc_public_key(key: &PrivateKey) -> Result<bitcoin::PublicKey, KeyError> {
    let secret = key.secp_secret()?;
    Ok(bitcoin::PublicKey::new_uncompressed(secret.public_key(SECP256K1)))
}

/// Keccak-derived 20-byte account id
fn account_id(key: &PrivateKey) -> Result<[u8; 20], KeyError> {
    let public = key.uncompressed_public_key()?;
    let hash = Keccak256::digest(&public[1..]);
    let mut id = [0u8; 20];
    id.copy_from_slice(&hash[12..]);
    Ok(id)
}

/// Lower-case `0x` Ethereum address
pub fn eth_address(key: &PrivateKey) -> Result<String, KeyError> {
    Ok(format!("0x{}", hex::encode(account_id(key)?)))
}

/// Base58check Tron address
pub fn tron_address(key: &PrivateKey) -> Result<String, KeyError> {
    let mut raw = [0u8; 21];
    raw[0] = TRON_ADDRESS_PREFIX;
    raw[1..].copy_from_slice(&account_id(key)?);
    Ok(base58check_encode(&raw))
}

/// Convert a hex Tron address (`41…`) to base58check
pub fn tron_hex_to_base58(hex_address: &str) -> Result<String, KeyError> {
    let s = hex_address.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let raw = hex::decode(s).map_err(|_| KeyError::InvalidAddress(hex_address.to_string()))?;

    if raw.len() != 21 || raw[0] != TRON_ADDRESS_PREFIX {
        return Err(KeyError::InvalidAddress(hex_address.to_string()));
    }

    Ok(base58check_encode(&raw))
}

/// Decode a base58check Tron address into its 21 raw bytes
pub fn tron_base58_to_bytes(address: &str) -> Result<[u8; 21], KeyError> {
    let payload = bs58::decode(address.trim())
        .with_check(Some(TRON_ADDRESS_PREFIX))
        .into_vec()
        .map_err(|_| KeyError::InvalidAddress(address.to_string()))?;

    payload
        .try_into()
        .map_err(|_| KeyError::InvalidAddress(address.to_string()))
}

fn base58check_encode(payload: &[u8]) -> String {
    bs58::encode(payload).with_check().into_string()
}
