//! Graph-local channel: resolve entity mentions in the query, then expand
//! via 1-hop `MENTIONED_IN` traversal. See SPEC_FULL.md §4.3.3.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ChannelError, ExpandMode, GraphStoreClient};
use crate::types::{ChannelResult, RankedChunk};

use super::{ChannelClient, ChannelContext};

/// Entities below this confidence are not considered resolved mentions.
pub const ENTITY_CONFIDENCE_THRESHOLD: f32 = 0.5;

pub struct GraphLocalChannel {
    client: Arc<dyn GraphStoreClient>,
}

impl GraphLocalChannel {
    pub fn new(client: Arc<dyn GraphStoreClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelClient for GraphLocalChannel {
    async fn query(&self, ctx: &ChannelContext<'_>) -> Result<ChannelResult, ChannelError> {
        let matches = self
            .client
            .resolve_entities(ctx.query_text, ENTITY_CONFIDENCE_THRESHOLD)
            .await?;
        if matches.is_empty() {
            return Ok(ChannelResult::empty());
        }
        let entity_ids: Vec<String> = matches.into_iter().map(|m| m.entity_id).collect();
        let hits = self
            .client
            .expand(ctx.namespace, &entity_ids, ExpandMode::Local, ctx.top_k)
            .await?;
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
