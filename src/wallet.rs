// src/wallet.rs
use std::time::Duration;

use alloy::primitives::Address;
use chrono::Utc;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{info, warn};

use crate::aggregator;
use crate::ens;
use crate::error::{Result, WalletError};
use crate::models::{Direction, NftCollection, TokenBalances, WalletMetadata, WalletSnapshot};
use crate::nfts::{stream_nfts, DEFAULT_NFT_PAGE_SIZE};
use crate::parser::format_units;
use crate::rpc::Upstream;
use crate::transfers::{direction_stream, TransferQuery};

/// Batch caps for the one-shot endpoint. These bound latency independently of
/// the per-direction transfer cap; `transfer_batches` applies to each direction.
#[derive(Debug, Clone, Copy)]
pub struct FullDataLimits {
    pub transfer_batches: usize,
    pub nft_batches: usize,
}

impl Default for FullDataLimits {
    fn default() -> Self {
        Self {
            transfer_batches: 10,
            nft_batches: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FullDataRequest {
    pub include_nft: bool,
    pub max_per_direction: usize,
    pub direction: Direction,
}

impl Default for FullDataRequest {
    fn default() -> Self {
        Self {
            include_nft: true,
            max_per_direction: 0,
            direction: Direction::Both,
        }
    }
}

/// Native balance, nonce and primary ENS name, fetched concurrently.
pub async fn get_metadata(upstream: &Upstream, address: Address) -> Result<WalletMetadata> {
    let ens_name = async {
        match ens::lookup_address(upstream, address).await {
            Ok(name) => name,
            Err(e) => {
                warn!(%address, error = %e, "reverse ENS lookup failed");
                None
            }
        }
    };

    let (balance, tx_count, ens) = tokio::join!(
        upstream.get_balance(address),
        upstream.get_transaction_count(address),
        ens_name,
    );
    let balance = balance?;

    Ok(WalletMetadata {
        address: address.to_checksum(None),
        ens,
        eth_balance: balance.to_string(),
        eth_balance_formatted: format_units(balance, 18),
        transaction_count: tx_count?,
    })
}

pub async fn get_token_balances(upstream: &Upstream, address: Address) -> Result<TokenBalances> {
    upstream.get_token_balances(address).await
}

/// Everything about a wallet in one object.
///
/// Metadata, transfers and token balances are mandatory: the first failure
/// among them aborts the request. The NFT branch is optional and degrades to
/// `None`.
pub async fn full_wallet_data(
    upstream: &Upstream,
    address: Address,
    request: &FullDataRequest,
    limits: FullDataLimits,
    page_delay: Duration,
) -> Result<WalletSnapshot> {
    let metadata = get_metadata(upstream, address);

    let transfers = async {
        let query = TransferQuery {
            max_per_direction: request.max_per_direction,
            include_nft: request.include_nft,
            ..TransferQuery::new(address)
        };
        // each direction gets its own batch budget
        let batches: Vec<_> = stream::iter(request.direction.sides())
            .map(|side| {
                direction_stream(upstream.clone(), query.clone(), side, page_delay)
                    .take(limits.transfer_batches)
            })
            .flatten()
            .try_collect()
            .await?;
        Ok::<_, WalletError>(batches.into_iter().flat_map(|b| b.data).collect::<Vec<_>>())
    };

    let balances = get_token_balances(upstream, address);

    let nfts = async {
        if !request.include_nft {
            return Ok::<_, WalletError>(None);
        }
        let batches: Result<Vec<_>> =
            stream_nfts(upstream.clone(), address, DEFAULT_NFT_PAGE_SIZE, page_delay)
                .take(limits.nft_batches)
                .try_collect()
                .await;
        match batches {
            Ok(batches) => {
                let total_count = batches.last().map(|b| b.total_count).unwrap_or(0);
                let owned_nfts: Vec<_> = batches.into_iter().flat_map(|b| b.data).collect();
                Ok(Some(NftCollection {
                    fetched: owned_nfts.len(),
                    owned_nfts,
                    total_count,
                }))
            }
            Err(e) => {
                warn!(%address, error = %e, "NFT branch failed, continuing without NFTs");
                Ok(None)
            }
        }
    };

    let (metadata, transfers, token_balances, nfts) =
        tokio::try_join!(metadata, transfers, balances, nfts)?;

    let derived_stats = aggregator::derive_stats(&address, &transfers);
    info!(
        %address,
        transfers = transfers.len(),
        tokens = token_balances.token_balances.len(),
        nfts = nfts.as_ref().map(|n| n.fetched),
        "assembled full wallet data"
    );

    Ok(WalletSnapshot {
        metadata,
        transfers,
        token_balances,
        nfts,
        derived_stats,
        fetched_at: Utc::now(),
    })
}
