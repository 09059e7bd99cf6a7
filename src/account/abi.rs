//! ERC-20 / TRC-20 call data
//!
//! Only the two calls the engine makes: `transfer(address,uint256)` and
//! `balanceOf(address)`. Tron contracts use the same ABI with the 0x41
//! prefix stripped from addresses.

use crate::chain::ChainError;

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

const WORD: usize = 32;

fn address_word(address: &[u8; 20]) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address);
    word
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Call data for `transfer(to, amount)`
pub fn encode_transfer(to: &[u8; 20], amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 2 * WORD);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&address_word(to));
    data.extend_from_slice(&uint_word(amount));
    data
}

/// Call data for `balanceOf(owner)`
pub fn encode_balance_of(owner: &[u8; 20]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&address_word(owner));
    data
}

/// Recipient and amount of a `transfer` call
///
/// `None` for any other call, or an amount beyond `u128`.
pub fn decode_transfer(input: &[u8]) -> Option<([u8; 20], u128)> {
    if input.len() < 4 + 2 * WORD || input[..4] != TRANSFER_SELECTOR {
        return None;
    }

    let mut to = [0u8; 20];
    to.copy_from_slice(&input[4 + 12..4 + WORD]);
    let amount = decode_uint(&input[4 + WORD..4 + 2 * WORD])?;

    Some((to, amount))
}

/// Big-endian uint256 word, if it fits in `u128`
pub fn decode_uint(word: &[u8]) -> Option<u128> {
    if word.len() > WORD {
        return None;
    }
    let split = word.len().saturating_sub(16);
    if word[..split].iter().any(|b| *b != 0) {
        return None;
    }

    let mut buf = [0u8; 16];
    buf[16 - (word.len() - split)..].copy_from_slice(&word[split..]);
    Some(u128::from_be_bytes(buf))
}

/// Raw bytes of a `0x` account address
pub fn parse_eth_address(address: &str) -> Result<[u8; 20], ChainError> {
    let invalid = || ChainError::InvalidAddress(address.to_string());
    let digits = address.trim().strip_prefix("0x").ok_or_else(invalid)?;
    let raw = hex::decode(digits).map_err(|_| invalid())?;

    raw.try_into().map_err(|_| invalid())
}

/// Decode `0x`-prefixed hex data
pub fn decode_hex(data: &str) -> Result<Vec<u8>, ChainError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(digits).map_err(|e| ChainError::Parse(format!("hex data: {}", e)))
}
