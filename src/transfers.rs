// src/transfers.rs
use std::time::Duration;

use alloy::primitives::Address;
use async_stream::try_stream;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::time::sleep;
use tracing::info;

use crate::error::WalletError;
use crate::models::{Category, Direction, Side, TransferBatch};
use crate::rpc::{AssetTransferRequest, Upstream, TRANSFER_PAGE_SIZE};

/// What to fetch for one wallet.
#[derive(Debug, Clone)]
pub struct TransferQuery {
    pub address: Address,
    /// Inclusive lower bound, hex block number or tag.
    pub from_block: String,
    /// Per-direction cap; 0 means unbounded.
    pub max_per_direction: usize,
    pub include_nft: bool,
}

impl TransferQuery {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            from_block: "0x0".to_string(),
            max_per_direction: 0,
            include_nft: true,
        }
    }
}

pub fn categories(include_nft: bool) -> Vec<Category> {
    let mut categories = vec![Category::External, Category::Internal, Category::Erc20];
    if include_nft {
        categories.extend([Category::Erc721, Category::Erc1155]);
    }
    categories
}

/// Paginate one direction. Owns its cursor and running total.
pub fn direction_stream(
    upstream: Upstream,
    query: TransferQuery,
    side: Side,
    page_delay: Duration,
) -> impl Stream<Item = Result<TransferBatch, WalletError>> + Send + 'static {
    try_stream! {
        let cap = query.max_per_direction;
        let mut request = AssetTransferRequest {
            from_block: query.from_block.clone(),
            from_address: (side == Side::From).then_some(query.address),
            to_address: (side == Side::To).then_some(query.address),
            categories: categories(query.include_nft),
            page_key: None,
            max_count: TRANSFER_PAGE_SIZE,
        };
        let mut page = 0u32;
        let mut total = 0usize;

        loop {
            page += 1;

            let resp = upstream.get_asset_transfers(&request).await?;
            let mut transfers = resp.transfers;
            if cap > 0 {
                transfers.truncate(cap - total);
            }

            let fetched = !transfers.is_empty();
            if fetched {
                total += transfers.len();
                info!(%side, page, count = transfers.len(), total, "fetched transfer page");
                yield TransferBatch::new(side, page, total, transfers);
            }

            if cap > 0 && total >= cap {
                info!(%side, total, cap, "transfer cap reached");
                break;
            }

            request.page_key = resp.page_key;
            if request.page_key.is_none() || !fetched {
                break;
            }

            sleep(page_delay).await;
        }
    }
}

/// Transfers for one wallet, `from` batches strictly before `to` batches.
///
/// The two directions never share pagination state; each is its own stream and
/// they are drained in order.
pub fn stream_transfers(
    upstream: Upstream,
    query: TransferQuery,
    direction: Direction,
    page_delay: Duration,
) -> impl Stream<Item = Result<TransferBatch, WalletError>> + Send + 'static {
    stream::iter(direction.sides())
        .map(move |side| direction_stream(upstream.clone(), query.clone(), side, page_delay))
        .flatten()
}
