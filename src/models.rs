// src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WalletError;

/// Asset class of a transfer, as named by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    External,
    Internal,
    Erc20,
    Erc721,
    Erc1155,
    Specialnft,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::External => "external",
            Category::Internal => "internal",
            Category::Erc20 => "erc20",
            Category::Erc721 => "erc721",
            Category::Erc1155 => "erc1155",
            Category::Specialnft => "specialnft",
            Category::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContract {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub decimal: Option<String>,
}

/// A single asset transfer as returned by `alchemy_getAssetTransfers`.
///
/// `value` stays untyped: the provider sends a float (or null) and callers of
/// the stats endpoint may send anything, so parsing happens at aggregation time.
/// Fields not modelled here are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    #[serde(default)]
    pub block_num: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub raw_contract: RawContract,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `alchemy_getAssetTransfers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPage {
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub page_key: Option<String>,
}

/// One page of `alchemy_getNFTs`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftPage {
    #[serde(default)]
    pub owned_nfts: Vec<Value>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub page_key: Option<String>,
}

/// Which transfer directions a stream covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    From,
    To,
    #[default]
    Both,
}

impl Direction {
    /// Sides in emission order: `from` always precedes `to`.
    pub fn sides(self) -> Vec<Side> {
        match self {
            Direction::From => vec![Side::From],
            Direction::To => vec![Side::To],
            Direction::Both => vec![Side::From, Side::To],
        }
    }
}

impl FromStr for Direction {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from" => Ok(Direction::From),
            "to" => Ok(Direction::To),
            "both" => Ok(Direction::Both),
            _ => Err(WalletError::InvalidParameter(
                "direction must be 'from', 'to', or 'both'".to_string(),
            )),
        }
    }
}

/// The role the wallet plays in a single-direction transfer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    From,
    To,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::From => write!(f, "from"),
            Side::To => write!(f, "to"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferBatch {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub page: u32,
    pub count: usize,
    pub total: usize,
    pub direction: Side,
    pub data: Vec<Transfer>,
}

impl TransferBatch {
    pub fn new(side: Side, page: u32, total: usize, data: Vec<Transfer>) -> Self {
        let kind = match side {
            Side::From => "from_transfers",
            Side::To => "to_transfers",
        };
        Self {
            kind,
            page,
            count: data.len(),
            total,
            direction: side,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NftBatch {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub page: u32,
    pub count: usize,
    pub total: usize,
    #[serde(rename = "totalCount")]
    pub total_count: u64,
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Complete,
    Error,
}

/// Terminal marker closing a stream.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub message: String,
}

/// What a streaming consumer receives: data batches, then one terminal signal.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent<T> {
    Batch(T),
    Signal(Signal),
}

impl<T> StreamEvent<T> {
    pub fn complete(message: impl Into<String>) -> Self {
        StreamEvent::Signal(Signal {
            kind: SignalKind::Complete,
            message: message.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Signal(Signal {
            kind: SignalKind::Error,
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub contract_address: String,
    #[serde(default)]
    pub token_balance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalances {
    pub address: String,
    #[serde(default)]
    pub token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMetadata {
    pub address: String,
    pub ens: Option<String>,
    pub eth_balance: String,
    pub eth_balance_formatted: String,
    pub transaction_count: u64,
}

/// Aggregate figures over a set of transfers. Native amounts are reported in
/// wei and in ether.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStats {
    pub total_eth_in_wei: String,
    pub total_eth_out_wei: String,
    pub net_eth_wei: String,
    pub total_eth_in_formatted: String,
    pub total_eth_out_formatted: String,
    pub net_eth_formatted: String,
    pub token_contracts: Vec<String>,
    pub total_transfers: usize,
    pub unique_transactions: usize,
    pub skipped_values: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NftCollection {
    pub owned_nfts: Vec<Value>,
    pub fetched: usize,
    pub total_count: u64,
}

/// Combined result of the one-shot wallet endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub metadata: WalletMetadata,
    pub transfers: Vec<Transfer>,
    pub token_balances: TokenBalances,
    pub nfts: Option<NftCollection>,
    pub derived_stats: WalletStats,
    pub fetched_at: DateTime<Utc>,
}
