//! Sparse (lexical) channel: BM25-family scoring over the query's sparse
//! representation, scoped by namespace. See SPEC_FULL.md §4.3.2.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clients::{ChannelError, SparseIndexClient};
use crate::types::{ChannelResult, RankedChunk};

use super::{ChannelClient, ChannelContext};

pub struct SparseChannel {
    client: Arc<dyn SparseIndexClient>,
}

impl SparseChannel {
    pub fn new(client: Arc<dyn SparseIndexClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelClient for SparseChannel {
    async fn query(&self, ctx: &ChannelContext<'_>) -> Result<ChannelResult, ChannelError> {
        let terms = ctx.sparse_terms.ok_or_else(|| {
            ChannelError::Permanent("sparse channel requires sparse query terms".to_string())
        })?;
        let hits = self.client.search(ctx.namespace, terms, ctx.top_k).await?;
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
    use crate::clients::mock::{MockSparseIndexClient, SparseFixture};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_sparse_channel_requires_sparse_terms() {
        let channel = SparseChannel::new(Arc::new(MockSparseIndexClient::empty()));
        let ctx = ChannelContext {
            namespace: "ns",
            query_text: "q",
            dense_vector: None,
            sparse_terms: None,
            top_k: 10,
        };
        let err = channel.query(&ctx).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_sparse_channel_scores_term_overlap() {
        let mut doc_terms = HashMap::new();
        doc_terms.insert(1u32, 2.0f32);
        let client = MockSparseIndexClient::new(vec![SparseFixture {
            namespace: "ns".into(),
            chunk_id: "c1".into(),
            terms: doc_terms,
        }]);
        let channel = SparseChannel::new(Arc::new(client));
        let mut query_terms = HashMap::new();
        query_terms.insert(1u32, 1.0f32);
        let ctx = ChannelContext {
            namespace: "ns",
            query_text: "q",
            dense_vector: None,
            sparse_terms: Some(&query_terms),
            top_k: 10,
        };
        let result = channel.query(&ctx).await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
