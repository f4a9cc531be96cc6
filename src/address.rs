// src/address.rs
use std::str::FromStr;

use alloy::primitives::Address;
use tracing::{debug, warn};

use crate::ens;
use crate::error::{Result, WalletError};
use crate::rpc::Upstream;

/// Parse `input` if it is already a hex account identifier.
///
/// All-lower or all-upper hex is accepted as is; mixed case must be a valid
/// EIP-55 checksum.
pub fn parse_canonical(input: &str) -> Option<Address> {
    let digits = input.strip_prefix("0x")?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(input, None).ok()
    } else {
        Address::from_str(input).ok()
    }
}

/// Turn an address or ENS name into a checksummed address.
///
/// Runs before any data fetch; inputs that cannot be names fail without
/// touching the upstream.
pub async fn resolve_address(upstream: &Upstream, input: &str) -> Result<Address> {
    let input = input.trim();
    if let Some(addr) = parse_canonical(input) {
        return Ok(addr);
    }

    if !input.contains('.') {
        return Err(WalletError::InvalidAddress(input.to_string()));
    }

    match ens::resolve_name(upstream, input).await {
        Ok(Some(addr)) => {
            debug!(name = input, %addr, "resolved ENS name");
            Ok(addr)
        }
        Ok(None) => Err(WalletError::InvalidAddress(input.to_string())),
        Err(e) => {
            warn!(name = input, error = %e, "ENS lookup failed");
            Err(WalletError::InvalidAddress(input.to_string()))
        }
    }
}
