//! Intent-weighted Reciprocal Rank Fusion.
//!
//! `score[chunk_id] += weight(channel) * 1 / (k_rrf + rank + 1)`, summed
//! across every channel that returned the chunk. See SPEC_FULL.md §4.2.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{ChannelName, ChannelRanks, ChannelResult, FusedEntry, FusedResult, WeightProfile};

pub const DEFAULT_K_RRF: usize = 60;

/// Renormalize a weight profile over the subset of channels that actually
/// produced a result, so weights sum to 1.0 over the surviving channels. If
/// every surviving channel has weight 0 in the profile, falls back to equal
/// weighting among them (SPEC_FULL.md §4.2 edge case).
pub fn renormalize(profile: WeightProfile, surviving: &[ChannelName]) -> WeightProfile {
    if surviving.is_empty() {
        return WeightProfile {
            vector: 0.0,
            sparse: 0.0,
            graph_local: 0.0,
            graph_global: 0.0,
        };
    }
    let total: f32 = surviving.iter().map(|c| profile.get(*c)).sum();
    let mut out = WeightProfile {
        vector: 0.0,
        sparse: 0.0,
        graph_local: 0.0,
        graph_global: 0.0,
    };
    if total > 0.0 {
        for channel in surviving {
            out = out.with(*channel, profile.get(*channel) / total);
        }
    } else {
        let equal = 1.0 / surviving.len() as f32;
        for channel in surviving {
            out = out.with(*channel, equal);
        }
    }
    out
}

/// Fuse per-channel ranked results into a single ranked list, bounded to
/// `top_k`. `weights` must already be renormalized over the channels present
/// in `channel_results` (callers should call `renormalize` first).
pub fn fuse(
    channel_results: &[(ChannelName, &ChannelResult)],
    weights: &WeightProfile,
    top_k: usize,
    k_rrf: usize,
) -> FusedResult {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut ranks: HashMap<String, ChannelRanks> = HashMap::new();

    for (channel, result) in channel_results {
        let weight = weights.get(*channel);
        if weight == 0.0 {
            continue;
        }
        for (rank, item) in result.ranked_iter() {
            let rrf = 1.0 / (k_rrf + rank + 1) as f32;
            *scores.entry(item.chunk_id.clone()).or_insert(0.0) += weight * rrf;
            ranks
                .entry(item.chunk_id.clone())
                .or_default()
                .set(*channel, rank);
        }
    }

    let mut entries: Vec<FusedEntry> = scores
        .into_iter()
        .map(|(chunk_id, fused_score)| {
            let chunk_ranks = ranks.remove(&chunk_id).unwrap_or_default();
            FusedEntry {
                chunk_id,
                fused_score,
                ranks: chunk_ranks,
            }
        })
        .collect();

    entries.sort_by(|a, b| compare_entries(a, b));
    entries.truncate(top_k);

    FusedResult { entries }
}

/// Deterministic ordering: fused_score descending, then min contributing
/// rank ascending, then contributor count descending, then chunk_id
/// lexicographically ascending. See SPEC_FULL.md §4.2 / §8 tie-break
/// stability property.
fn compare_entries(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.ranks.min_rank().cmp(&b.ranks.min_rank()))
        .then_with(|| b.ranks.contributor_count().cmp(&a.ranks.contributor_count()))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
