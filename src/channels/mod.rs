//! The `ChannelClient` capability abstraction and the retry/timeout
//! dispatch wrapper shared by all four channels. See SPEC_FULL.md §4.3 and
//! the "duck-typed channel objects" re-architecture note in §9.

pub mod graph_global;
pub mod graph_local;
pub mod sparse;
pub mod vector;

use std::time::Duration;

use async_trait::async_trait;

use crate::clients::{ChannelError, SparseQuery};
use crate::types::ChannelResult;

pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 2000;
pub const RETRY_BACKOFF_MS: u64 = 50;

/// Everything a channel might need to answer a query. Each concrete channel
/// reads only the fields it needs; unused fields are `None`/ignored.
pub struct ChannelContext<'a> {
    pub namespace: &'a str,
    pub query_text: &'a str,
    pub dense_vector: Option<&'a [f32]>,
    pub sparse_terms: Option<&'a SparseQuery>,
    pub top_k: usize,
}

/// Uniform capability exposed by all four channels:
/// `query(namespace, input, top_k) -> Result<ChannelResult, ChannelError>`.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    async fn query(&self, ctx: &ChannelContext<'_>) -> Result<ChannelResult, ChannelError>;
}

/// Dispatches a channel query under a timeout, retrying once on a transient
/// failure with a fixed backoff. A permanent failure or a second transient
/// failure is returned as-is (the orchestrator maps it to CHANNEL_FAILED).
/// A timeout is reported as a transient `ChannelError` so it behaves like
/// any other CHANNEL_FAILED outcome to the caller (SPEC_FULL.md §4.3).
pub async fn dispatch_with_retry(
    channel: &dyn ChannelClient,
    ctx: &ChannelContext<'_>,
    timeout: Duration,
) -> Result<ChannelResult, ChannelError> {
    match run_with_timeout(channel, ctx, timeout).await {
        Ok(result) => Ok(result),
        Err(err) if err.is_transient() => {
            tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS)).await;
            run_with_timeout(channel, ctx, timeout).await
        }
        Err(err) => Err(err),
    }
}

async fn run_with_timeout(
    channel: &dyn ChannelClient,
    ctx: &ChannelContext<'_>,
    timeout: Duration,
) -> Result<ChannelResult, ChannelError> {
    match tokio::time::timeout(timeout, channel.query(ctx)).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Transient(format!(
            "channel timed out after {timeout:?}"
        ))),
    }
}
