//! Core data model: Query, Intent, WeightProfile, ChunkRef, ChannelResult,
//! FusedResult. See `SPEC_FULL.md` §3.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// One of the five closed intent values a query can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Factual,
    Keyword,
    Exploratory,
    Summary,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::Factual,
        Intent::Keyword,
        Intent::Exploratory,
        Intent::Summary,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Factual => "factual",
            Intent::Keyword => "keyword",
            Intent::Exploratory => "exploratory",
            Intent::Summary => "summary",
            Intent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classification result: an intent with a confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
        }
    }
}

/// One of the four retrieval channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelName {
    Vector,
    Sparse,
    GraphLocal,
    GraphGlobal,
}

impl ChannelName {
    pub const ALL: [ChannelName; 4] = [
        ChannelName::Vector,
        ChannelName::Sparse,
        ChannelName::GraphLocal,
        ChannelName::GraphGlobal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::Vector => "vector",
            ChannelName::Sparse => "sparse",
            ChannelName::GraphLocal => "graph_local",
            ChannelName::GraphGlobal => "graph_global",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-negative per-channel weights that sum to 1.0 for a given intent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub vector: f32,
    pub sparse: f32,
    pub graph_local: f32,
    pub graph_global: f32,
}

impl WeightProfile {
    pub fn get(&self, channel: ChannelName) -> f32 {
        match channel {
            ChannelName::Vector => self.vector,
            ChannelName::Sparse => self.sparse,
            ChannelName::GraphLocal => self.graph_local,
            ChannelName::GraphGlobal => self.graph_global,
        }
    }

    pub fn with(&self, channel: ChannelName, weight: f32) -> Self {
        let mut out = *self;
        match channel {
            ChannelName::Vector => out.vector = weight,
            ChannelName::Sparse => out.sparse = weight,
            ChannelName::GraphLocal => out.graph_local = weight,
            ChannelName::GraphGlobal => out.graph_global = weight,
        }
        out
    }

    pub fn sum(&self) -> f32 {
        self.vector + self.sparse + self.graph_local + self.graph_global
    }

    /// Predefined profile for an intent, per the table in SPEC_FULL.md §3.
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::Factual => WeightProfile {
                vector: 0.3,
                sparse: 0.3,
                graph_local: 0.4,
                graph_global: 0.0,
            },
            Intent::Keyword => WeightProfile {
                vector: 0.1,
                sparse: 0.6,
                graph_local: 0.3,
                graph_global: 0.0,
            },
            Intent::Exploratory => WeightProfile {
                vector: 0.2,
                sparse: 0.1,
                graph_local: 0.2,
                graph_global: 0.5,
            },
            Intent::Summary => WeightProfile {
                vector: 0.1,
                sparse: 0.0,
                graph_local: 0.1,
                graph_global: 0.8,
            },
            Intent::Unknown => WeightProfile {
                vector: 0.4,
                sparse: 0.2,
                graph_local: 0.2,
                graph_global: 0.2,
            },
        }
    }

    /// A stable hash of the weight values, for cache-key construction.
    pub fn stable_hash(&self) -> u64 {
        // f32 bit patterns are stable across processes for the same value;
        // quantize to avoid float noise from renormalization rounding.
        let q = |w: f32| (w * 1_000_000.0).round() as i64;
        let mut h = 0xcbf29ce484222325u64; // FNV-1a offset basis
        for v in [self.vector, self.sparse, self.graph_local, self.graph_global] {
            for byte in q(v).to_le_bytes() {
                h ^= byte as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
        }
        h
    }
}

/// A reference to a retrieved chunk, always tagged with the namespace it was
/// served from. Equality is defined by (chunk_id, namespace).
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub namespace: String,
    pub score: f32,
    pub provenance: BTreeSet<ChannelName>,
}

impl PartialEq for ChunkRef {
    fn eq(&self, other: &Self) -> bool {
        self.chunk_id == other.chunk_id && self.namespace == other.namespace
    }
}
impl Eq for ChunkRef {}

/// One entry in a channel's ranked result list: 0-indexed rank, raw score
/// retained for observability only (fusion uses rank, not raw_score).
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub raw_score: f32,
}

/// The ordered output of a single channel query. Invariant: no duplicate
/// chunk_ids — duplicates are collapsed to the best (lowest) rank when the
/// list is constructed via `ChannelResult::new`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelResult {
    items: Vec<RankedChunk>,
}

impl ChannelResult {
    /// Build a ChannelResult from raw (chunk_id, score) pairs, already
    /// sorted descending by the caller. Collapses duplicate chunk_ids to
    /// their first (best) occurrence, per the channel-boundary invariant.
    pub fn new(ranked: Vec<RankedChunk>) -> Self {
        let mut seen = std::collections::HashSet::with_capacity(ranked.len());
        let items = ranked
            .into_iter()
            .filter(|r| seen.insert(r.chunk_id.clone()))
            .collect();
        Self { items }
    }

    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate (rank, chunk) pairs, rank 0-indexed per SPEC_FULL §4.2.
    pub fn ranked_iter(&self) -> impl Iterator<Item = (usize, &RankedChunk)> {
        self.items.iter().enumerate()
    }

    pub fn truncate(&mut self, top_k: usize) {
        self.items.truncate(top_k);
    }
}

/// Per-channel rank provenance attached to a fused result entry.
#[derive(Debug, Clone, Default)]
pub struct ChannelRanks {
    pub vector: Option<usize>,
    pub sparse: Option<usize>,
    pub graph_local: Option<usize>,
    pub graph_global: Option<usize>,
}

impl ChannelRanks {
    pub fn set(&mut self, channel: ChannelName, rank: usize) {
        match channel {
            ChannelName::Vector => self.vector = Some(rank),
            ChannelName::Sparse => self.sparse = Some(rank),
            ChannelName::GraphLocal => self.graph_local = Some(rank),
            ChannelName::GraphGlobal => self.graph_global = Some(rank),
        }
    }

    pub fn min_rank(&self) -> Option<usize> {
        [self.vector, self.sparse, self.graph_local, self.graph_global]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn contributor_count(&self) -> usize {
        [self.vector, self.sparse, self.graph_local, self.graph_global]
            .into_iter()
            .filter(|r| r.is_some())
            .count()
    }
}

/// One entry of a fused, ranked result.
#[derive(Debug, Clone)]
pub struct FusedEntry {
    pub chunk_id: String,
    pub fused_score: f32,
    pub ranks: ChannelRanks,
}

impl FusedEntry {
    pub fn provenance(&self) -> BTreeSet<ChannelName> {
        let mut set = BTreeSet::new();
        if self.ranks.vector.is_some() {
            set.insert(ChannelName::Vector);
        }
        if self.ranks.sparse.is_some() {
            set.insert(ChannelName::Sparse);
        }
        if self.ranks.graph_local.is_some() {
            set.insert(ChannelName::GraphLocal);
        }
        if self.ranks.graph_global.is_some() {
            set.insert(ChannelName::GraphGlobal);
        }
        set
    }
}

/// The ordered, bounded output of fusion. Strictly ordered by fused_score
/// descending (§3 invariants); length is at most the requested top_k.
#[derive(Debug, Clone, Default)]
pub struct FusedResult {
    pub entries: Vec<FusedEntry>,
}

impl FusedResult {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Materialize chunk refs tagged with the requesting namespace —
    /// the point at which namespace isolation is enforced structurally.
    pub fn into_chunk_refs(self, namespace: &str) -> Vec<ChunkRef> {
        self.entries
            .into_iter()
            .map(|e| ChunkRef {
                chunk_id: e.chunk_id,
                namespace: namespace.to_string(),
                score: e.fused_score,
                provenance: e.provenance(),
            })
            .collect()
    }
}

/// Per-channel overrides and feature toggles a caller may supply.
#[derive(Debug, Clone, Default)]
pub struct QueryOverrides {
    pub intent: Option<Intent>,
    pub weight_profile: Option<WeightProfile>,
    pub per_channel_top_k: Option<usize>,
    pub channels_enabled: Option<BTreeSet<ChannelName>>,
    pub bypass_cache: bool,
}

/// An immutable retrieval request. Constructed via `Query::new`, which
/// enforces the validation rules in §3/§4.5 step 1.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub namespace: String,
    pub top_k: usize,
    pub overrides: QueryOverrides,
}

pub const MIN_QUERY_LEN: usize = 1;
pub const MAX_QUERY_LEN: usize = 4096;
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;

impl Query {
    /// Construct and validate a query. Fails fast with `RetrievalError::
    /// Validation` per §4.5 step 1 — length, non-empty namespace, top_k
    /// bounds.
    pub fn new(text: impl Into<String>, namespace: impl Into<String>) -> Result<Self> {
        Self::with_top_k(text, namespace, DEFAULT_TOP_K)
    }

    pub fn with_top_k(
        text: impl Into<String>,
        namespace: impl Into<String>,
        top_k: usize,
    ) -> Result<Self> {
        let text = text.into();
        let namespace = namespace.into();
        validate(&text, &namespace, top_k)?;
        Ok(Self {
            text,
            namespace,
            top_k,
            overrides: QueryOverrides::default(),
        })
    }

    pub fn with_overrides(mut self, overrides: QueryOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn channel_enabled(&self, channel: ChannelName) -> bool {
        match &self.overrides.channels_enabled {
            Some(set) => set.contains(&channel),
            None => true,
        }
    }
}

fn validate(text: &str, namespace: &str, top_k: usize) -> Result<()> {
    let char_len = text.chars().count();
    if char_len < MIN_QUERY_LEN || char_len > MAX_QUERY_LEN {
        return Err(RetrievalError::Validation(format!(
            "query text length {} out of bounds [{}, {}]",
            char_len, MIN_QUERY_LEN, MAX_QUERY_LEN
        )));
    }
    if namespace.trim().is_empty() {
        return Err(RetrievalError::Validation(
            "namespace must be non-empty".to_string(),
        ));
    }
    if top_k < MIN_TOP_K || top_k > MAX_TOP_K {
        return Err(RetrievalError::Validation(format!(
            "top_k {} out of bounds [{}, {}]",
            top_k, MIN_TOP_K, MAX_TOP_K
        )));
    }
    Ok(())
}
