// src/stream.rs
use async_stream::stream;
use futures_util::pin_mut;
use futures_util::stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::error::WalletError;
use crate::models::StreamEvent;

/// Close a batch stream with exactly one terminal signal.
///
/// Batches already yielded stay valid: a failure only ends the stream with an
/// `error` signal.
pub fn terminated<T, S>(batches: S, done: &'static str) -> impl Stream<Item = StreamEvent<T>>
where
    S: Stream<Item = Result<T, WalletError>>,
{
    stream! {
        pin_mut!(batches);
        let mut delivered = 0usize;
        while let Some(item) = batches.next().await {
            match item {
                Ok(batch) => {
                    delivered += 1;
                    yield StreamEvent::Batch(batch);
                }
                Err(e) => {
                    warn!(delivered, error = %e, "stream aborted");
                    yield StreamEvent::error(e.to_string());
                    return;
                }
            }
        }
        info!(delivered, "{}", done);
        yield StreamEvent::complete(done);
    }
}
