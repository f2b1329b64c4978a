//! Maps a query string to an `(Intent, confidence)` pair. Never fails: any
//! internal error degrades to the rule-based fallback, and if that yields
//! nothing the classifier returns `(unknown, 0.0)`. See SPEC_FULL.md §4.1.

pub mod rules;

use std::sync::OnceLock;

use crate::types::{Classification, Intent};
use rules::RuleSet;

const EMBED_DIM: usize = 256;

/// Per-intent example queries used to build prototype centroids at load
/// time. Hand-written few-shot set, not sourced from a labeled corpus —
/// the evaluation harness that would validate these is out of scope.
const EXAMPLES: &[(Intent, &[&str])] = &[
    (
        Intent::Factual,
        &[
            "what is the boiling point of water",
            "who is the ceo of the company",
            "when was the library founded",
            "where is the nearest office located",
            "what is a mutex",
        ],
    ),
    (
        Intent::Keyword,
        &[
            "database connection pooling",
            "rate limiter implementation",
            "tls handshake",
            "cache eviction policy",
            "load balancer config",
        ],
    ),
    (
        Intent::Exploratory,
        &[
            "compare rust and go for backend services",
            "explain the difference between tcp and udp",
            "how does garbage collection compare across languages",
            "what are the tradeoffs of microservices versus monoliths",
            "explain how consensus algorithms work",
        ],
    ),
    (
        Intent::Summary,
        &[
            "summarize the onboarding documentation",
            "give me an overview of the deployment pipeline",
            "tldr of the incident postmortem",
            "summary of the architecture decision records",
            "what's the general overview of this subsystem",
        ],
    ),
];

/// A prototype centroid vector per intent, computed once from `EXAMPLES`.
struct Model {
    centroids: Vec<(Intent, Vec<f32>)>,
}

impl Model {
    fn build() -> Self {
        let centroids = EXAMPLES
            .iter()
            .map(|(intent, examples)| {
                let mut sum = vec![0.0f32; EMBED_DIM];
                for example in *examples {
                    let embedded = lexical_embed(example);
                    for (acc, v) in sum.iter_mut().zip(embedded.iter()) {
                        *acc += v;
                    }
                }
                normalize(&mut sum);
                (*intent, sum)
            })
            .collect();
        Self { centroids }
    }

    /// Returns the softmax-normalized probability of the top-scoring
    /// intent, computed from cosine similarity against each centroid.
    fn classify(&self, query_embedding: &[f32]) -> (Intent, f32) {
        let similarities: Vec<(Intent, f32)> = self
            .centroids
            .iter()
            .map(|(intent, centroid)| (*intent, cosine(query_embedding, centroid)))
            .collect();
        softmax_top(&similarities)
    }
}

/// Hashing-trick bag-of-words embedding: deterministic, dependency-free,
/// and stable across processes — unlike the retrieval-time dense/sparse
/// embeddings (which come from the external `EmbeddingClient`), the
/// classifier's "few-shot head" is self-contained so intent classification
/// never depends on an upstream network call.
fn lexical_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBED_DIM];
    for token in text.to_lowercase().split_whitespace() {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::hash::Hash::hash(&token, &mut hasher);
        let bucket = (std::hash::Hasher::finish(&hasher) as usize) % EMBED_DIM;
        vector[bucket] += 1.0;
    }
    normalize(&mut vector);
    vector
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn softmax_top(similarities: &[(Intent, f32)]) -> (Intent, f32) {
    // Similarities live in [-1, 1]; scale before exponentiating so a clear
    // winner produces a confident (close to 1.0) top probability.
    const TEMPERATURE: f32 = 8.0;
    let max = similarities
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<(Intent, f32)> = similarities
        .iter()
        .map(|(intent, s)| (*intent, ((s - max) * TEMPERATURE).exp()))
        .collect();
    let total: f32 = exps.iter().map(|(_, e)| e).sum();
    exps.into_iter()
        .map(|(intent, e)| (intent, if total > 0.0 { e / total } else { 0.0 }))
        .fold((Intent::Unknown, 0.0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
}

/// Maps queries to intents. Holds the learned model behind a `OnceLock`
/// so the first call pays initialization cost and every subsequent call
/// observes the fully built model without taking a lock.
pub struct IntentClassifier {
    model: OnceLock<Model>,
    model_load_failed: OnceLock<()>,
    rules: RuleSet,
    confidence_threshold: f32,
}

impl IntentClassifier {
    pub fn new(rules: RuleSet, confidence_threshold: f32) -> Self {
        Self {
            model: OnceLock::new(),
            model_load_failed: OnceLock::new(),
            rules,
            confidence_threshold,
        }
    }

    pub fn with_defaults(confidence_threshold: f32) -> Self {
        Self::new(RuleSet::defaults(), confidence_threshold)
    }

    fn model(&self) -> Option<&Model> {
        if self.model_load_failed.get().is_some() {
            return None;
        }
        Some(self.model.get_or_init(|| {
            match std::panic::catch_unwind(Model::build) {
                Ok(model) => model,
                Err(_) => {
                    let _ = self.model_load_failed.set(());
                    log::warn!("intent classifier model failed to load; degrading to rule-based fallback only");
                    Model { centroids: Vec::new() }
                }
            }
        }))
        .filter(|m| !m.centroids.is_empty())
    }

    /// Classify a query. Never fails or panics to the caller.
    pub fn classify(&self, query: &str) -> Classification {
        if let Some(model) = self.model() {
            let embedding = lexical_embed(query);
            let (intent, confidence) = model.classify(&embedding);
            if confidence >= self.confidence_threshold {
                return Classification { intent, confidence };
            }
        }
        if let Some((intent, confidence)) = self.rules.classify(query) {
            return Classification { intent, confidence };
        }
        Classification::unknown()
    }
}
