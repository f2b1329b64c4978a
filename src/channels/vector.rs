//! Dense (vector) channel: nearest-neighbor search over the query's dense
//! embedding, scoped by namespace. See SPEC_FULL.md §4.3.1.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ChannelError, DenseIndexClient};
use crate::types::{ChannelResult, RankedChunk};

use super::{ChannelClient, ChannelContext};

pub struct VectorChannel {
    client: Arc<dyn DenseIndexClient>,
}

impl VectorChannel {
    pub fn new(client: Arc<dyn DenseIndexClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelClient for VectorChannel {
    async fn query(&self, ctx: &ChannelContext<'_>) -> Result<ChannelResult, ChannelError> {
        let vector = ctx.dense_vector.ok_or_else(|| {
            ChannelError::Permanent("vector channel requires a dense query vector".to_string())
        })?;
        let hits = self.client.search(ctx.namespace, vector, ctx.top_k).await?;
        Ok(ChannelResult::new(
            hits.into_iter()
                .map(|h| RankedChunk {
                    chunk_id: h.chunk_id,
                    raw_score: h.score,
                })
                .collect(),
        ))
    }
}
