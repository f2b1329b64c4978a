//! Graph-global channel: resolve entity mentions, look up their community
//! membership, then expand via community-linked chunks. See SPEC_FULL.md
//! §4.3.4.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ChannelError, ExpandMode, GraphStoreClient};
use crate::types::{ChannelResult, RankedChunk};

use super::graph_local::ENTITY_CONFIDENCE_THRESHOLD;
use super::{ChannelClient, ChannelContext};

pub struct GraphGlobalChannel {
    client: Arc<dyn GraphStoreClient>,
}

impl GraphGlobalChannel {
    pub fn new(client: Arc<dyn GraphStoreClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelClient for GraphGlobalChannel {
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
            .expand(ctx.namespace, &entity_ids, ExpandMode::Global, ctx.top_k)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockGraphStoreClient;

    #[tokio::test]
    async fn test_graph_global_returns_empty_when_no_entities_resolved() {
        let channel = GraphGlobalChannel::new(Arc::new(MockGraphStoreClient::new()));
        let ctx = ChannelContext {
            namespace: "ns",
            query_text: "nothing matches here",
            dense_vector: None,
            sparse_terms: None,
            top_k: 10,
        };
        let result = channel.query(&ctx).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_graph_global_expands_via_community() {
        let client = MockGraphStoreClient::new()
            .with_mention("rust", "e1", 0.9)
            .with_community("e1", "community-1")
            .with_global_chunks("ns", "community-1", vec!["c3".into()]);
        let channel = GraphGlobalChannel::new(Arc::new(client));
        let ctx = ChannelContext {
            namespace: "ns",
            query_text: "tell me about rust",
            dense_vector: None,
            sparse_terms: None,
            top_k: 10,
        };
        let result = channel.query(&ctx).await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
