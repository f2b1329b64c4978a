//! Outbound trait contracts for the four external collaborators: the
//! embedding service, the dense index, the sparse index, and the graph
//! store. See SPEC_FULL.md §6.
//!
//! Each trait has an HTTP-backed implementation (`clients::http`) and an
//! in-memory mock (`clients::mock`) used by tests and the demo binary.

pub mod http;
pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub const DENSE_VECTOR_DIM: usize = 1024;

/// A sparse-term query representation: term id to weight. Kept distinct
/// from classic BM25 term-frequency maps so the trait can also front a
/// learned-sparse-vector index transparently (SPEC_FULL.md §9).
pub type SparseQuery = HashMap<u32, f32>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transient error: {0}")]
    Transient(String),
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient(_))
    }
}

/// A single search hit before rank assignment: raw chunk id and score.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub chunk_id: String,
    pub score: f32,
}

/// Produces dense and sparse query representations for a query string.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ChannelError>;
    async fn embed_sparse(&self, text: &str) -> Result<SparseQuery, ChannelError>;
}

/// Nearest-neighbor search over dense vectors, scoped by namespace.
#[async_trait]
pub trait DenseIndexClient: Send + Sync {
    async fn search(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError>;
}

/// Lexical / learned-sparse search, scoped by namespace.
#[async_trait]
pub trait SparseIndexClient: Send + Sync {
    async fn search(
        &self,
        namespace: &str,
        sparse_terms: &SparseQuery,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError>;
}

/// Traversal mode for `GraphStoreClient::expand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    /// 1-hop `entity —MENTIONED_IN→ chunk` traversal.
    Local,
    /// Join via `community_id` on entity nodes, then expand.
    Global,
}

/// A resolved entity mention with confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub entity_id: String,
    pub confidence: f32,
}

/// Two read operations over the knowledge graph: entity resolution and
/// chunk expansion (local or global mode).
#[async_trait]
pub trait GraphStoreClient: Send + Sync {
    async fn resolve_entities(
        &self,
        text: &str,
        confidence_threshold: f32,
    ) -> Result<Vec<EntityMatch>, ChannelError>;

    async fn expand(
        &self,
        namespace: &str,
        entity_ids: &[String],
        mode: ExpandMode,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError>;
}
