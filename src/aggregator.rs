// src/aggregator.rs
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::models::{Category, Transfer, WalletStats};
use crate::parser::format_units;

const ETHER_DECIMALS: u32 = 18;

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Provider values are ether-denominated floats; anything else is unusable.
fn parse_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// Scale to base units, truncating anything below one wei.
fn to_base_units(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return None;
    }
    let mantissa = U256::from(amount.mantissa().unsigned_abs());
    let scale = amount.scale();
    let ten = U256::from(10u8);
    if scale <= decimals {
        mantissa.checked_mul(ten.pow(U256::from(decimals - scale)))
    } else {
        Some(mantissa / ten.pow(U256::from(scale - decimals)))
    }
}

fn signed_difference(a: U256, b: U256) -> (bool, U256) {
    if a >= b {
        (false, a - b)
    } else {
        (true, b - a)
    }
}

/// Net native flow and distinct-entity counts over any set of transfers.
///
/// Native values that fail to parse are dropped from the sums and counted in
/// `skipped_values`; they still count toward `total_transfers`.
pub fn derive_stats(address: &Address, transfers: &[Transfer]) -> WalletStats {
    let me = address.to_checksum(None).to_lowercase();
    let mut total_in = U256::ZERO;
    let mut total_out = U256::ZERO;
    let mut token_contracts = BTreeSet::new();
    let mut tx_hashes = HashSet::new();
    let mut skipped = 0usize;

    for transfer in transfers {
        if let Some(hash) = transfer.hash.as_deref().filter(|h| !h.is_empty()) {
            tx_hashes.insert(hash);
        }

        if transfer.category != Category::External {
            if let Some(contract) = transfer.raw_contract.address.as_deref().filter(|a| !a.is_empty()) {
                token_contracts.insert(contract.to_string());
            }
            continue;
        }

        let Some(raw) = transfer.value.as_ref().filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(wei) = parse_value(raw).and_then(|d| to_base_units(d, ETHER_DECIMALS)) else {
            skipped += 1;
            warn!(hash = ?transfer.hash, value = %raw, "skipping unparseable transfer value");
            continue;
        };

        let to_me = transfer.to.as_deref().is_some_and(|to| to.to_lowercase() == me);
        let from_me = transfer.from.as_deref().is_some_and(|from| from.to_lowercase() == me);
        if to_me {
            total_in = total_in.saturating_add(wei);
        }
        if from_me {
            total_out = total_out.saturating_add(wei);
        }
    }

    if skipped > 0 {
        warn!(%address, skipped, "derived stats computed with skipped values");
    }

    let (negative, net) = signed_difference(total_in, total_out);
    let sign = if negative { "-" } else { "" };
    let decimals = ETHER_DECIMALS as usize;

    WalletStats {
        total_eth_in_wei: total_in.to_string(),
        total_eth_out_wei: total_out.to_string(),
        net_eth_wei: format!("{sign}{net}"),
        total_eth_in_formatted: format_units(total_in, decimals),
        total_eth_out_formatted: format_units(total_out, decimals),
        net_eth_formatted: format!("{sign}{}", format_units(net, decimals)),
        token_contracts: token_contracts.into_iter().collect(),
        total_transfers: transfers.len(),
        unique_transactions: tx_hashes.len(),
        skipped_values: skipped,
    }
}
