//! Property-based tests for the fusion, cache, and channel-filtering
//! invariants. See SPEC_FULL.md §8 for the invariant list these cover.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use hybrid_retrieval_core::cache::{cache_key, RelevanceCache};
use hybrid_retrieval_core::clients::mock::{DenseFixture, MockDenseIndexClient};
use hybrid_retrieval_core::clients::DenseIndexClient;
use hybrid_retrieval_core::types::{ChannelResult, RankedChunk};
use hybrid_retrieval_core::{ChannelName, FusedResult, Intent, WeightProfile};
use proptest::prelude::*;

fn channel_result_of(ids: &[&str]) -> ChannelResult {
    ChannelResult::new(
        ids.iter()
            .map(|id| RankedChunk {
                chunk_id: id.to_string(),
                raw_score: 1.0,
            })
            .collect(),
    )
}

fn fused_ids(result: &FusedResult) -> Vec<String> {
    result.entries.iter().map(|e| e.chunk_id.clone()).collect()
}

fn weight_profile_strategy() -> impl Strategy<Value = WeightProfile> {
    (0.0f32..5.0, 0.0f32..5.0, 0.0f32..5.0, 0.0f32..5.0).prop_map(
        |(vector, sparse, graph_local, graph_global)| WeightProfile {
            vector,
            sparse,
            graph_local,
            graph_global,
        },
    )
}

fn channel_subset_strategy() -> impl Strategy<Value = Vec<ChannelName>> {
    proptest::sample::subsequence(ChannelName::ALL.to_vec(), 0..=4)
}

/// Distinct, small chunk-id lists — small alphabet so overlap across
/// channels actually happens some of the time.
fn ranked_id_list_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(proptest::sample::select(vec!["a", "b", "c", "d", "e"]), 0..6)
        .prop_map(|ids| {
            let mut seen = HashSet::new();
            ids.into_iter()
                .filter(|id| seen.insert(id.to_string()))
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
        })
}

proptest! {
    /// Invariant 2: renormalized weights over a surviving subset sum to 1.0,
    /// or are all equal when the profile's weights over that subset sum to 0.
    #[test]
    fn prop_renormalize_sums_to_one_over_surviving(
        profile in weight_profile_strategy(),
        surviving in channel_subset_strategy(),
    ) {
        if surviving.is_empty() {
            let renorm = hybrid_retrieval_core::fusion::renormalize(profile, &surviving);
            prop_assert_eq!(renorm.sum(), 0.0);
            return Ok(());
        }
        let renorm = hybrid_retrieval_core::fusion::renormalize(profile, &surviving);
        let total_raw: f32 = surviving.iter().map(|c| profile.get(*c)).sum();
        if total_raw > 0.0 {
            prop_assert!((renorm.sum() - 1.0).abs() < 1e-4);
        } else {
            let expected = 1.0 / surviving.len() as f32;
            for channel in &surviving {
                prop_assert!((renorm.get(*channel) - expected).abs() < 1e-4);
            }
        }
        for channel in ChannelName::ALL {
            if !surviving.contains(&channel) {
                prop_assert_eq!(renorm.get(channel), 0.0);
            }
        }
    }

    /// Invariant 4: fused_score is non-increasing with position.
    #[test]
    fn prop_fused_results_are_rank_monotonic(
        vector_ids in ranked_id_list_strategy(),
        sparse_ids in ranked_id_list_strategy(),
    ) {
        let vector_result = channel_result_of(&vector_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let sparse_result = channel_result_of(&sparse_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let weights = WeightProfile { vector: 0.5, sparse: 0.5, graph_local: 0.0, graph_global: 0.0 };
        let fused = hybrid_retrieval_core::fusion::fuse(
            &[(ChannelName::Vector, &vector_result), (ChannelName::Sparse, &sparse_result)],
            &weights,
            50,
            60,
        );
        for window in fused.entries.windows(2) {
            prop_assert!(window[0].fused_score >= window[1].fused_score);
        }
    }

    /// Invariant 5: shuffling channel input order does not change fused output order.
    #[test]
    fn prop_fusion_order_is_independent_of_channel_input_order(
        vector_ids in ranked_id_list_strategy(),
        sparse_ids in ranked_id_list_strategy(),
        graph_local_ids in ranked_id_list_strategy(),
    ) {
        let vector_result = channel_result_of(&vector_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let sparse_result = channel_result_of(&sparse_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let graph_local_result = channel_result_of(&graph_local_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let weights = WeightProfile { vector: 0.3, sparse: 0.3, graph_local: 0.4, graph_global: 0.0 };

        let forward = hybrid_retrieval_core::fusion::fuse(
            &[
                (ChannelName::Vector, &vector_result),
                (ChannelName::Sparse, &sparse_result),
                (ChannelName::GraphLocal, &graph_local_result),
            ],
            &weights,
            50,
            60,
        );
        let reversed = hybrid_retrieval_core::fusion::fuse(
            &[
                (ChannelName::GraphLocal, &graph_local_result),
                (ChannelName::Sparse, &sparse_result),
                (ChannelName::Vector, &vector_result),
            ],
            &weights,
            50,
            60,
        );
        prop_assert_eq!(fused_ids(&forward), fused_ids(&reversed));
    }

    /// Invariant 6: a single channel at weight 1.0 preserves its input order.
    #[test]
    fn prop_single_channel_rrf_preserves_input_order(ids in ranked_id_list_strategy()) {
        let result = channel_result_of(&ids.iter().map(String::as_str).collect::<Vec<_>>());
        let weights = WeightProfile { vector: 1.0, sparse: 0.0, graph_local: 0.0, graph_global: 0.0 };
        let fused = hybrid_retrieval_core::fusion::fuse(
            &[(ChannelName::Vector, &result)],
            &weights,
            ids.len().max(1),
            60,
        );
        prop_assert_eq!(fused_ids(&fused), ids);
    }

    /// Invariant 7: fusion never returns more than top_k entries, nor more
    /// than the number of unique chunk ids across all channel inputs.
    #[test]
    fn prop_fusion_bounds_respect_top_k_and_unique_count(
        vector_ids in ranked_id_list_strategy(),
        sparse_ids in ranked_id_list_strategy(),
        top_k in 0usize..8,
    ) {
        let vector_result = channel_result_of(&vector_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let sparse_result = channel_result_of(&sparse_ids.iter().map(String::as_str).collect::<Vec<_>>());
        let weights = WeightProfile { vector: 0.5, sparse: 0.5, graph_local: 0.0, graph_global: 0.0 };
        let fused = hybrid_retrieval_core::fusion::fuse(
            &[(ChannelName::Vector, &vector_result), (ChannelName::Sparse, &sparse_result)],
            &weights,
            top_k,
            60,
        );
        let unique: HashSet<String> = vector_ids.iter().chain(sparse_ids.iter()).cloned().collect();
        prop_assert!(fused.len() <= top_k);
        prop_assert!(fused.len() <= unique.len());
    }

    /// Invariant 1 (structural form): a namespace-scoped index search never
    /// returns a chunk fixtured under a different namespace.
    #[test]
    fn prop_dense_index_never_crosses_namespace(
        fixtures in proptest::collection::vec(
            (proptest::sample::select(vec!["tenant-a", "tenant-b", "tenant-c"]), 0u32..20),
            0..10,
        ),
        query_namespace in proptest::sample::select(vec!["tenant-a", "tenant-b", "tenant-c"]),
    ) {
        let dense_fixtures: Vec<DenseFixture> = fixtures
            .iter()
            .map(|(ns, id)| DenseFixture {
                namespace: ns.to_string(),
                chunk_id: format!("chunk-{id}"),
                vector: vec![1.0, 0.0],
            })
            .collect();
        let client = MockDenseIndexClient::new(dense_fixtures);
        let expected_ids: HashSet<String> = fixtures
            .iter()
            .filter(|(ns, _)| *ns == query_namespace)
            .map(|(_, id)| format!("chunk-{id}"))
            .collect();

        let hits = tokio_test_block_on(client.search(query_namespace, &[1.0, 0.0], 100));
        let hits = hits.unwrap();
        for hit in &hits {
            prop_assert!(expected_ids.contains(&hit.chunk_id));
        }
    }

    /// Invariant 9: invalidating one namespace removes only that namespace's
    /// cache entries.
    #[test]
    fn prop_invalidate_namespace_is_isolated(
        entries in proptest::collection::vec(proptest::sample::select(vec!["tenant-a", "tenant-b"]), 0..12),
    ) {
        let cache = RelevanceCache::new(100, Duration::from_secs(300));
        for (i, namespace) in entries.iter().enumerate() {
            let key = format!("k{i}");
            let weights = WeightProfile::for_intent(Intent::Factual);
            let channels = BTreeSet::from([ChannelName::Vector]);
            let derived = cache_key(namespace, Intent::Factual, &key, 10, &channels, &weights);
            cache.put(derived, FusedResult::empty(), Intent::Factual, namespace);
        }
        cache.invalidate_namespace("tenant-a");

        for (i, namespace) in entries.iter().enumerate() {
            let key = format!("k{i}");
            let weights = WeightProfile::for_intent(Intent::Factual);
            let channels = BTreeSet::from([ChannelName::Vector]);
            let derived = cache_key(namespace, Intent::Factual, &key, 10, &channels, &weights);
            if *namespace == "tenant-a" {
                prop_assert!(cache.get(&derived).is_none());
            } else {
                prop_assert!(cache.get(&derived).is_some());
            }
        }
    }
}

/// Tiny blocking helper so the proptest closures above (which must be sync)
/// can drive the async mock client without pulling tokio::test into the
/// proptest! macro itself.
fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build current-thread runtime for property test")
        .block_on(fut)
}

/// Invariant 8: a cache hit returns a response structurally identical to
/// what the miss path computed, for the same key.
#[test]
fn cache_hit_matches_what_the_miss_path_computed() {
    let cache = RelevanceCache::new(10, Duration::from_secs(300));
    let vector_result = channel_result_of(&["a", "b"]);
    let weights = WeightProfile { vector: 1.0, sparse: 0.0, graph_local: 0.0, graph_global: 0.0 };
    let computed = hybrid_retrieval_core::fusion::fuse(
        &[(ChannelName::Vector, &vector_result)],
        &weights,
        10,
        60,
    );
    let computed_ids = fused_ids(&computed);

    cache.put("k1".into(), computed, Intent::Factual, "ns");
    let hit = cache.get("k1").expect("expected a cache hit");
    assert_eq!(fused_ids(&hit), computed_ids);
}

/// Invariant 10: with exactly one or two channels failing out of a larger
/// enabled set, a non-empty surviving channel still produces a non-empty
/// fused response (the orchestrator's NO_SIGNAL threshold requires at least
/// three failures).
#[tokio::test]
async fn graceful_degradation_survives_one_or_two_channel_failures() {
    use hybrid_retrieval_core::cache::RelevanceCache as Cache;
    use hybrid_retrieval_core::clients::mock::{
        MockDenseIndexClient as Dense, MockEmbeddingClient as Embedding, MockGraphStoreClient as Graph,
        MockSparseIndexClient as Sparse,
    };
    use hybrid_retrieval_core::clients::{ChannelError, DENSE_VECTOR_DIM};
    use hybrid_retrieval_core::intent::IntentClassifier;
    use hybrid_retrieval_core::types::QueryOverrides;
    use hybrid_retrieval_core::{Query, RetrievalOrchestrator};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    let config_toml = r#"
[channels.dense_index]
base_url = "http://localhost:1"
[channels.sparse_index]
base_url = "http://localhost:2"
[channels.graph_store]
base_url = "http://localhost:3"
[channels.embedding]
base_url = "http://localhost:4"
"#;

    for failed in [1usize, 2usize] {
        let dense = Dense::new(vec![DenseFixture {
            namespace: "ns".into(),
            chunk_id: "chunk-1".into(),
            vector: vec![1.0; DENSE_VECTOR_DIM],
        }]);
        let sparse = Sparse::empty();
        let graph = Graph::new();
        if failed >= 1 {
            sparse.set_failure(ChannelError::Transient("down".into()));
        }
        if failed >= 2 {
            graph.set_failure(ChannelError::Transient("down".into()));
        }

        let embedding = Arc::new(Embedding::new().with_dense("q", vec![1.0; DENSE_VECTOR_DIM]));
        let orchestrator = RetrievalOrchestrator::new(
            embedding,
            Arc::new(dense),
            Arc::new(sparse),
            Arc::new(graph),
            Arc::new(Cache::new(100, Duration::from_secs(300))),
            Arc::new(IntentClassifier::with_defaults(0.80)),
            Arc::new(toml::from_str(config_toml).unwrap()),
        );

        let mut overrides = QueryOverrides::default();
        overrides.intent = Some(Intent::Unknown);
        let query = Query::new("q", "ns").unwrap().with_overrides(overrides);
        let result = orchestrator.retrieve(query, CancellationToken::new()).await.unwrap();
        assert!(!result.is_empty(), "expected a non-empty result with {failed} channel(s) failed");
    }
}
