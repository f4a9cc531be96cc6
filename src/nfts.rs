// src/nfts.rs
use std::time::Duration;

use alloy::primitives::Address;
use async_stream::try_stream;
use futures_util::stream::Stream;
use tokio::time::sleep;
use tracing::info;

use crate::error::{Result, WalletError};
use crate::models::NftBatch;
use crate::rpc::Upstream;

pub const MAX_NFT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_NFT_PAGE_SIZE: u32 = 100;

pub fn validate_page_size(page_size: u32) -> Result<u32> {
    if (1..=MAX_NFT_PAGE_SIZE).contains(&page_size) {
        Ok(page_size)
    } else {
        Err(WalletError::InvalidParameter(format!(
            "page_size must be between 1 and {MAX_NFT_PAGE_SIZE}"
        )))
    }
}

/// NFTs owned by `owner`, one batch per provider page.
///
/// No total cap is applied; stop polling the stream to bound it.
pub fn stream_nfts(
    upstream: Upstream,
    owner: Address,
    page_size: u32,
    page_delay: Duration,
) -> impl Stream<Item = std::result::Result<NftBatch, WalletError>> + Send + 'static {
    try_stream! {
        let page_size = validate_page_size(page_size)?;
        let mut page_key: Option<String> = None;
        let mut page = 0u32;
        let mut total = 0usize;

        loop {
            page += 1;
            let resp = upstream.get_nfts(owner, page_size, page_key.as_deref()).await?;

            let fetched = !resp.owned_nfts.is_empty();
            if fetched {
                total += resp.owned_nfts.len();
                info!(page, count = resp.owned_nfts.len(), total, total_count = resp.total_count, "fetched NFT page");
                yield NftBatch {
                    kind: "nfts",
                    page,
                    count: resp.owned_nfts.len(),
                    total,
                    total_count: resp.total_count,
                    data: resp.owned_nfts,
                };
            }

            page_key = resp.page_key;
            if page_key.is_none() || !fetched {
                break;
            }

            sleep(page_delay).await;
        }
    }
}
