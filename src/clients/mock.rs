//! In-memory mock implementations of the four outbound client traits, used
//! by the test suite and the CLI demo binary. Mirrors the teacher crate's
//! `ChunkEmbeddingCache`/`search/vector.rs` in-memory cosine scoring, adapted
//! to a pre-seeded fixture rather than a database load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ChannelError, DenseIndexClient, EmbeddingClient, EntityMatch, ExpandMode, GraphStoreClient,
    Hit, SparseIndexClient, SparseQuery,
};

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "embedding dimension mismatch");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn top_k_by_score(mut hits: Vec<Hit>, top_k: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k);
    hits
}

/// Fixed mapping query text -> dense vector, used so tests can pick a query
/// whose embedding is known to be closest to a given fixture chunk.
#[derive(Default)]
pub struct MockEmbeddingClient {
    dense: Mutex<HashMap<String, Vec<f32>>>,
    sparse: Mutex<HashMap<String, SparseQuery>>,
    default_dense: Vec<f32>,
}

impl MockEmbeddingClient {
    pub fn new() -> Self {
        Self {
            dense: Mutex::new(HashMap::new()),
            sparse: Mutex::new(HashMap::new()),
            default_dense: vec![0.0; super::DENSE_VECTOR_DIM],
        }
    }

    pub fn with_dense(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.dense.lock().unwrap().insert(text.into(), vector);
        self
    }

    pub fn with_sparse(self, text: impl Into<String>, terms: SparseQuery) -> Self {
        self.sparse.lock().unwrap().insert(text.into(), terms);
        self
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ChannelError> {
        Ok(self
            .dense
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default_dense.clone()))
    }

    async fn embed_sparse(&self, text: &str) -> Result<SparseQuery, ChannelError> {
        Ok(self.sparse.lock().unwrap().get(text).cloned().unwrap_or_default())
    }
}

/// A fixture chunk with a known vector, scoped to a namespace.
#[derive(Clone)]
pub struct DenseFixture {
    pub namespace: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// In-memory nearest-neighbor search over a fixed fixture set, scored by
/// cosine similarity and filtered by namespace.
pub struct MockDenseIndexClient {
    fixtures: Vec<DenseFixture>,
    fail_with: Mutex<Option<ChannelError>>,
}

impl MockDenseIndexClient {
    pub fn new(fixtures: Vec<DenseFixture>) -> Self {
        Self {
            fixtures,
            fail_with: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Make every subsequent `search` call fail, for degraded-retrieval tests.
    pub fn set_failure(&self, err: ChannelError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl DenseIndexClient for MockDenseIndexClient {
    async fn search(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        if let Some(err) = self.fail_with.lock().unwrap().as_ref() {
            return Err(match err {
                ChannelError::Transient(m) => ChannelError::Transient(m.clone()),
                ChannelError::Permanent(m) => ChannelError::Permanent(m.clone()),
            });
        }
        let hits: Vec<Hit> = self
            .fixtures
            .iter()
            .filter(|f| f.namespace == namespace)
            .map(|f| Hit {
                chunk_id: f.chunk_id.clone(),
                score: cosine_similarity(query_vector, &f.vector),
            })
            .collect();
        Ok(top_k_by_score(hits, top_k))
    }
}

/// A fixture chunk scored by a fixed lexical match count, scoped to a
/// namespace — stands in for a real BM25 index.
#[derive(Clone)]
pub struct SparseFixture {
    pub namespace: String,
    pub chunk_id: String,
    pub terms: SparseQuery,
}

fn sparse_score(query: &SparseQuery, doc: &SparseQuery) -> f32 {
    query.iter().map(|(term, weight)| weight * doc.get(term).copied().unwrap_or(0.0)).sum()
}

pub struct MockSparseIndexClient {
    fixtures: Vec<SparseFixture>,
    fail_with: Mutex<Option<ChannelError>>,
}

impl MockSparseIndexClient {
    pub fn new(fixtures: Vec<SparseFixture>) -> Self {
        Self {
            fixtures,
            fail_with: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn set_failure(&self, err: ChannelError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl SparseIndexClient for MockSparseIndexClient {
    async fn search(
        &self,
        namespace: &str,
        sparse_terms: &SparseQuery,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        if let Some(err) = self.fail_with.lock().unwrap().as_ref() {
            return Err(match err {
                ChannelError::Transient(m) => ChannelError::Transient(m.clone()),
                ChannelError::Permanent(m) => ChannelError::Permanent(m.clone()),
            });
        }
        let hits: Vec<Hit> = self
            .fixtures
            .iter()
            .filter(|f| f.namespace == namespace)
            .map(|f| Hit {
                chunk_id: f.chunk_id.clone(),
                score: sparse_score(sparse_terms, &f.terms),
            })
            .filter(|h| h.score > 0.0)
            .collect();
        Ok(top_k_by_score(hits, top_k))
    }
}

/// In-memory knowledge graph fixture: entities mentioned by the query text
/// (keyed by exact substring match), community membership, and the chunks
/// each entity or community mentions.
#[derive(Default)]
pub struct MockGraphStoreClient {
    /// substring -> (entity_id, confidence)
    mentions: Vec<(String, EntityMatch)>,
    /// entity_id -> community_id
    community_of: HashMap<String, String>,
    /// (namespace, entity_id) -> chunk ids mentioning it (local expansion)
    local_chunks: HashMap<(String, String), Vec<String>>,
    /// (namespace, community_id) -> chunk ids mentioned by the community
    global_chunks: HashMap<(String, String), Vec<String>>,
    fail_with: Mutex<Option<ChannelError>>,
}

impl MockGraphStoreClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mention(mut self, substring: impl Into<String>, entity_id: impl Into<String>, confidence: f32) -> Self {
        self.mentions.push((
            substring.into(),
            EntityMatch {
                entity_id: entity_id.into(),
                confidence,
            },
        ));
        self
    }

    pub fn with_community(mut self, entity_id: impl Into<String>, community_id: impl Into<String>) -> Self {
        self.community_of.insert(entity_id.into(), community_id.into());
        self
    }

    pub fn with_local_chunks(
        mut self,
        namespace: impl Into<String>,
        entity_id: impl Into<String>,
        chunk_ids: Vec<String>,
    ) -> Self {
        self.local_chunks.insert((namespace.into(), entity_id.into()), chunk_ids);
        self
    }

    pub fn with_global_chunks(
        mut self,
        namespace: impl Into<String>,
        community_id: impl Into<String>,
        chunk_ids: Vec<String>,
    ) -> Self {
        self.global_chunks.insert((namespace.into(), community_id.into()), chunk_ids);
        self
    }

    pub fn set_failure(&self, err: ChannelError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl GraphStoreClient for MockGraphStoreClient {
    async fn resolve_entities(
        &self,
        text: &str,
        confidence_threshold: f32,
    ) -> Result<Vec<EntityMatch>, ChannelError> {
        if let Some(err) = self.fail_with.lock().unwrap().as_ref() {
            return Err(match err {
                ChannelError::Transient(m) => ChannelError::Transient(m.clone()),
                ChannelError::Permanent(m) => ChannelError::Permanent(m.clone()),
            });
        }
        let lower = text.to_lowercase();
        let mut seen = std::collections::HashSet::new();
        let matches = self
            .mentions
            .iter()
            .filter(|(substring, m)| {
                lower.contains(&substring.to_lowercase()) && m.confidence >= confidence_threshold
            })
            .filter(|(_, m)| seen.insert(m.entity_id.clone()))
            .map(|(_, m)| m.clone())
            .collect();
        Ok(matches)
    }

    async fn expand(
        &self,
        namespace: &str,
        entity_ids: &[String],
        mode: ExpandMode,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        if let Some(err) = self.fail_with.lock().unwrap().as_ref() {
            return Err(match err {
                ChannelError::Transient(m) => ChannelError::Transient(m.clone()),
                ChannelError::Permanent(m) => ChannelError::Permanent(m.clone()),
            });
        }
        let mut counts: HashMap<String, usize> = HashMap::new();
        match mode {
            ExpandMode::Local => {
                for entity_id in entity_ids {
                    if let Some(chunks) = self
                        .local_chunks
                        .get(&(namespace.to_string(), entity_id.clone()))
                    {
                        for chunk_id in chunks {
                            *counts.entry(chunk_id.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
            ExpandMode::Global => {
                let mut communities: Vec<String> = entity_ids
                    .iter()
                    .filter_map(|e| self.community_of.get(e).cloned())
                    .collect();
                communities.sort();
                communities.dedup();
                for community_id in communities {
                    if let Some(chunks) = self
                        .global_chunks
                        .get(&(namespace.to_string(), community_id.clone()))
                    {
                        for chunk_id in chunks {
                            *counts.entry(chunk_id.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        let hits: Vec<Hit> = counts
            .into_iter()
            .map(|(chunk_id, count)| Hit {
                chunk_id,
                score: count as f32,
            })
            .collect();
        Ok(top_k_by_score(hits, top_k))
    }
}

/// Wraps any client and counts invocations, panicking if called after a
/// configured call budget is exhausted — used by Scenario E (cache hit
/// must not re-dispatch channels).
pub struct CallCountingSpy<T> {
    inner: T,
    calls: AtomicUsize,
    max_calls: usize,
}

impl<T> CallCountingSpy<T> {
    pub fn new(inner: T, max_calls: usize) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            max_calls,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.max_calls {
            panic!("spy call budget of {} exceeded (call #{})", self.max_calls, n);
        }
    }
}

#[async_trait]
impl<T: DenseIndexClient> DenseIndexClient for CallCountingSpy<T> {
    async fn search(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        self.record_call();
        self.inner.search(namespace, query_vector, top_k).await
    }
}
