// src/parser.rs
use alloy::primitives::{Address, U256};

use crate::error::{Result, WalletError};

fn bad_payload(what: &str, raw: &str) -> WalletError {
    WalletError::Upstream(format!("malformed {what} in response: {raw}"))
}

/// Parse a `0x`-prefixed hex quantity (`eth_getTransactionCount`).
pub fn hex_to_u64(raw: &str) -> Result<u64> {
    let s = raw.trim_start_matches("0x");
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 16).map_err(|_| bad_payload("quantity", raw))
}

/// Parse a `0x`-prefixed hex quantity that may exceed 64 bits (`eth_getBalance`).
pub fn hex_to_u256(raw: &str) -> Result<U256> {
    let s = raw.trim_start_matches("0x");
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(s, 16).map_err(|_| bad_payload("quantity", raw))
}

/// Decode `eth_call` return data.
pub fn hex_to_bytes(raw: &str) -> Result<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x")).map_err(|_| bad_payload("call data", raw))
}

/// An ABI-encoded `address` return value: 32-byte word, address in the last 20 bytes.
pub fn word_to_address(word: &[u8]) -> Option<Address> {
    if word.len() < 32 {
        return None;
    }
    let addr_bytes: [u8; 20] = word[12..32].try_into().ok()?;
    Some(Address::from(addr_bytes))
}

fn word_to_usize(word: &[u8]) -> Option<usize> {
    // offsets and lengths never need more than the low 8 bytes
    if word.len() != 32 || word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let low: [u8; 8] = word[24..32].try_into().ok()?;
    usize::try_from(u64::from_be_bytes(low)).ok()
}

/// An ABI-encoded dynamic `string` return value: offset word, length word, bytes.
pub fn decode_abi_string(data: &[u8]) -> Option<String> {
    let offset = word_to_usize(data.get(0..32)?)?;
    let len = word_to_usize(data.get(offset..offset.checked_add(32)?)?)?;
    let start = offset + 32;
    let bytes = data.get(start..start.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Format a base-unit amount with `decimals` places, trimming trailing zeros.
pub fn format_units(value: U256, decimals: usize) -> String {
    let digits = value.to_string();
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}
