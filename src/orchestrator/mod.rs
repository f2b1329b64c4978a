//! `RetrievalOrchestrator`: the top-level coordinator. Validates, classifies
//! intent, consults the cache, dispatches the four channels concurrently,
//! fuses, and caches the result. See SPEC_FULL.md §4.5.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::cache::{cache_key, RelevanceCache};
use crate::channels::graph_global::GraphGlobalChannel;
use crate::channels::graph_local::GraphLocalChannel;
use crate::channels::sparse::SparseChannel;
use crate::channels::vector::VectorChannel;
use crate::channels::{dispatch_with_retry, ChannelClient, ChannelContext};
use crate::clients::{ChannelError, DenseIndexClient, EmbeddingClient, GraphStoreClient, SparseIndexClient};
use crate::config::Config;
use crate::error::{Result, RetrievalError};
use crate::fusion::{fuse, renormalize};
use crate::intent::IntentClassifier;
use crate::types::{ChannelName, FusedResult, Intent, Query, WeightProfile};

pub struct RetrievalOrchestrator {
    embedding: Arc<dyn EmbeddingClient>,
    vector_channel: Arc<dyn ChannelClient>,
    sparse_channel: Arc<dyn ChannelClient>,
    graph_local_channel: Arc<dyn ChannelClient>,
    graph_global_channel: Arc<dyn ChannelClient>,
    cache: Arc<RelevanceCache>,
    classifier: Arc<IntentClassifier>,
    config: Arc<Config>,
    semaphore: Arc<Semaphore>,
    inflight: DashMap<String, Arc<Notify>>,
}

impl RetrievalOrchestrator {
    pub fn new(
        embedding: Arc<dyn EmbeddingClient>,
        dense_index: Arc<dyn DenseIndexClient>,
        sparse_index: Arc<dyn SparseIndexClient>,
        graph_store: Arc<dyn GraphStoreClient>,
        cache: Arc<RelevanceCache>,
        classifier: Arc<IntentClassifier>,
        config: Arc<Config>,
    ) -> Self {
        let max_in_flight = config.performance.max_in_flight_requests;
        Self {
            embedding,
            vector_channel: Arc::new(VectorChannel::new(dense_index)),
            sparse_channel: Arc::new(SparseChannel::new(sparse_index)),
            graph_local_channel: Arc::new(GraphLocalChannel::new(graph_store.clone())),
            graph_global_channel: Arc::new(GraphGlobalChannel::new(graph_store)),
            cache,
            classifier,
            config,
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            inflight: DashMap::new(),
        }
    }

    /// `retrieve(Query) -> FusedResult | ErrorCode`. Enforces the
    /// whole-request deadline and cooperative cancellation around the
    /// entire pipeline.
    pub async fn retrieve(
        &self,
        query: Query,
        cancel: CancellationToken,
    ) -> Result<FusedResult> {
        let _permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            RetrievalError::ResourceExhausted(
                "maximum in-flight request count reached".to_string(),
            )
        })?;

        let start = Instant::now();
        let deadline = self.config.request_deadline();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!("retrieval canceled after {:?}", start.elapsed());
                Err(RetrievalError::DeadlineExceeded(start.elapsed()))
            }
            timed = tokio::time::timeout(deadline, self.run(query, cancel.clone())) => {
                match timed {
                    Ok(inner) => inner,
                    Err(_) => {
                        log::error!("retrieval exceeded deadline of {:?}", deadline);
                        Err(RetrievalError::DeadlineExceeded(deadline))
                    }
                }
            }
        };

        match &outcome {
            Ok(fused) => log::debug!(
                "retrieval completed: {} results in {:?}",
                fused.len(),
                start.elapsed()
            ),
            Err(e) => log::debug!("retrieval failed ({}) after {:?}", e.code(), start.elapsed()),
        }

        outcome
    }

    async fn run(&self, query: Query, cancel: CancellationToken) -> Result<FusedResult> {
        let trace_start = Instant::now();
        let intent = self.determine_intent(&query).await;
        let weights = self.determine_weights(&query, intent);
        let enabled = self.determine_enabled_channels(&query, &weights);

        log::info!(
            "namespace={} intent={intent} enabled_channels={} weights={weights:?}",
            query.namespace,
            enabled.len(),
        );

        if enabled.is_empty() {
            return Err(RetrievalError::NoSignal(
                "no channels are enabled for this request".to_string(),
            ));
        }

        if query.overrides.bypass_cache {
            let fused = self.dispatch_and_fuse(&query, intent, &weights, &enabled, &cancel).await?;
            log::info!(
                "namespace={} intent={intent} cache_hit=false result_count={} elapsed={:?}",
                query.namespace,
                fused.len(),
                trace_start.elapsed(),
            );
            return Ok(fused);
        }

        let key = cache_key(
            &query.namespace,
            intent,
            &query.text,
            query.top_k,
            &enabled,
            &weights,
        );

        if let Some(hit) = self.cache.get(&key) {
            log::info!(
                "namespace={} intent={intent} cache_hit=true result_count={} elapsed={:?}",
                query.namespace,
                hit.len(),
                trace_start.elapsed(),
            );
            return Ok((*hit).clone());
        }

        let fused = self
            .single_flight_compute(&key, &query, intent, &weights, &enabled, &cancel)
            .await?;

        log::info!(
            "namespace={} intent={intent} cache_hit=false result_count={} elapsed={:?}",
            query.namespace,
            fused.len(),
            trace_start.elapsed(),
        );
        Ok(fused)
    }

    /// Suppresses concurrent-miss stampedes: the first caller for a given
    /// key computes the value and writes it to the cache *before* vacating
    /// the inflight slot and waking waiters, so a woken waiter always finds
    /// the entry on its cache recheck. Failed computations are not cached,
    /// so a waiter that wakes to find the cache still empty (because the
    /// leader's computation failed) becomes the next leader and retries.
    async fn single_flight_compute(
        &self,
        key: &str,
        query: &Query,
        intent: Intent,
        weights: &WeightProfile,
        enabled: &BTreeSet<ChannelName>,
        cancel: &CancellationToken,
    ) -> Result<FusedResult> {
        loop {
            if let Some(hit) = self.cache.get(key) {
                return Ok((*hit).clone());
            }
            match self.inflight.entry(key.to_string()) {
                Entry::Occupied(entry) => {
                    let notify = entry.get().clone();
                    drop(entry);
                    notify.notified().await;
                    continue;
                }
                Entry::Vacant(entry) => {
                    let notify = Arc::new(Notify::new());
                    entry.insert(notify.clone());
                    let result = self.dispatch_and_fuse(query, intent, weights, enabled, cancel).await;
                    if let Ok(fused) = &result {
                        self.cache.put(key.to_string(), fused.clone(), intent, &query.namespace);
                    }
                    self.inflight.remove(key);
                    notify.notify_waiters();
                    return result;
                }
            }
        }
    }

    async fn determine_intent(&self, query: &Query) -> Intent {
        if let Some(intent) = query.overrides.intent {
            return intent;
        }
        let classifier = self.classifier.clone();
        let text = query.text.clone();
        match tokio::task::spawn_blocking(move || classifier.classify(&text)).await {
            Ok(classification) => classification.intent,
            Err(_) => Intent::Unknown,
        }
    }

    fn determine_weights(&self, query: &Query, intent: Intent) -> WeightProfile {
        query
            .overrides
            .weight_profile
            .unwrap_or_else(|| self.config.weight_profile_for(intent))
    }

    fn determine_enabled_channels(&self, query: &Query, weights: &WeightProfile) -> BTreeSet<ChannelName> {
        ChannelName::ALL
            .into_iter()
            .filter(|c| query.channel_enabled(*c) && weights.get(*c) > 0.0)
            .collect()
    }

    async fn dispatch_and_fuse(
        &self,
        query: &Query,
        intent: Intent,
        weights: &WeightProfile,
        enabled: &BTreeSet<ChannelName>,
        _cancel: &CancellationToken,
    ) -> Result<FusedResult> {
        let needs_dense = enabled.contains(&ChannelName::Vector);
        let needs_sparse = enabled.contains(&ChannelName::Sparse);

        let embed_start = Instant::now();
        let (dense_result, sparse_result) = tokio::join!(
            async {
                if needs_dense {
                    Some(self.embedding.embed_dense(&query.text).await)
                } else {
                    None
                }
            },
            async {
                if needs_sparse {
                    Some(self.embedding.embed_sparse(&query.text).await)
                } else {
                    None
                }
            }
        );
        if needs_dense || needs_sparse {
            log::debug!("embedding generation took {:?}", embed_start.elapsed());
        }

        let per_channel_top_k = query.overrides.per_channel_top_k.unwrap_or(query.top_k);
        let timeout = self.config.channel_timeout();

        let vector_fut = async {
            if !enabled.contains(&ChannelName::Vector) {
                return None;
            }
            let vector = match &dense_result {
                Some(Ok(v)) => v.as_slice(),
                Some(Err(e)) => {
                    return Some(Err(ChannelError::Transient(format!(
                        "dense embedding unavailable: {e}"
                    ))))
                }
                None => return Some(Err(ChannelError::Permanent("dense embedding not requested".into()))),
            };
            let ctx = ChannelContext {
                namespace: &query.namespace,
                query_text: &query.text,
                dense_vector: Some(vector),
                sparse_terms: None,
                top_k: per_channel_top_k,
            };
            Some(dispatch_with_retry(self.vector_channel.as_ref(), &ctx, timeout).await)
        };

        let sparse_fut = async {
            if !enabled.contains(&ChannelName::Sparse) {
                return None;
            }
            let terms = match &sparse_result {
                Some(Ok(t)) => t,
                Some(Err(e)) => {
                    return Some(Err(ChannelError::Transient(format!(
                        "sparse embedding unavailable: {e}"
                    ))))
                }
                None => return Some(Err(ChannelError::Permanent("sparse embedding not requested".into()))),
            };
            let ctx = ChannelContext {
                namespace: &query.namespace,
                query_text: &query.text,
                dense_vector: None,
                sparse_terms: Some(terms),
                top_k: per_channel_top_k,
            };
            Some(dispatch_with_retry(self.sparse_channel.as_ref(), &ctx, timeout).await)
        };

        let graph_local_fut = async {
            if !enabled.contains(&ChannelName::GraphLocal) {
                return None;
            }
            let ctx = ChannelContext {
                namespace: &query.namespace,
                query_text: &query.text,
                dense_vector: None,
                sparse_terms: None,
                top_k: per_channel_top_k,
            };
            Some(dispatch_with_retry(self.graph_local_channel.as_ref(), &ctx, timeout).await)
        };

        let graph_global_fut = async {
            if !enabled.contains(&ChannelName::GraphGlobal) {
                return None;
            }
            let ctx = ChannelContext {
                namespace: &query.namespace,
                query_text: &query.text,
                dense_vector: None,
                sparse_terms: None,
                top_k: per_channel_top_k,
            };
            Some(dispatch_with_retry(self.graph_global_channel.as_ref(), &ctx, timeout).await)
        };

        let dispatch_start = Instant::now();
        let (vector_res, sparse_res, graph_local_res, graph_global_res) =
            tokio::join!(vector_fut, sparse_fut, graph_local_fut, graph_global_fut);
        log::debug!("channel dispatch took {:?}", dispatch_start.elapsed());

        let dispatched = [
            (ChannelName::Vector, vector_res),
            (ChannelName::Sparse, sparse_res),
            (ChannelName::GraphLocal, graph_local_res),
            (ChannelName::GraphGlobal, graph_global_res),
        ];

        let mut surviving = Vec::new();
        let mut failed_count = 0usize;
        let mut dispatched_count = 0usize;
        for (name, maybe_result) in dispatched {
            let Some(result) = maybe_result else { continue };
            dispatched_count += 1;
            match result {
                Ok(channel_result) => surviving.push((name, channel_result)),
                Err(err) => {
                    failed_count += 1;
                    log::warn!("channel {name} failed: {err}");
                }
            }
        }

        if failed_count >= 3 || surviving.is_empty() {
            log::error!(
                "catastrophic retrieval failure: {failed_count} of {dispatched_count} enabled channels failed"
            );
            return Err(RetrievalError::NoSignal(format!(
                "{failed_count} of {dispatched_count} enabled channels failed"
            )));
        }
        if failed_count > 0 {
            log::warn!("degraded retrieval: {failed_count} of {dispatched_count} enabled channels failed");
        }

        let surviving_names: Vec<ChannelName> = surviving.iter().map(|(name, _)| *name).collect();
        let renormalized = renormalize(*weights, &surviving_names);
        let refs: Vec<(ChannelName, &crate::types::ChannelResult)> =
            surviving.iter().map(|(name, result)| (*name, result)).collect();

        let fusion_start = Instant::now();
        let fused = fuse(&refs, &renormalized, query.top_k, self.config.fusion.rrf_k);
        log::debug!(
            "fusion produced {} results in {:?}",
            fused.len(),
            fusion_start.elapsed()
        );

        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{
        DenseFixture, MockDenseIndexClient, MockEmbeddingClient, MockGraphStoreClient, MockSparseIndexClient,
        SparseFixture,
    };
    use crate::intent::IntentClassifier;
    use crate::types::QueryOverrides;
    use std::time::Duration;

    fn test_config() -> Config {
        let toml = r#"
[channels.dense_index]
base_url = "http://localhost:1"
[channels.sparse_index]
base_url = "http://localhost:2"
[channels.graph_store]
base_url = "http://localhost:3"
[channels.embedding]
base_url = "http://localhost:4"
"#;
        toml::from_str(toml).unwrap()
    }

    fn make_orchestrator(
        dense: MockDenseIndexClient,
        sparse: MockSparseIndexClient,
        graph: MockGraphStoreClient,
    ) -> RetrievalOrchestrator {
        let embedding = Arc::new(MockEmbeddingClient::new());
        let cache = Arc::new(RelevanceCache::new(100, Duration::from_secs(300)));
        let classifier = Arc::new(IntentClassifier::with_defaults(0.80));
        let config = Arc::new(test_config());
        RetrievalOrchestrator::new(
            embedding,
            Arc::new(dense),
            Arc::new(sparse),
            Arc::new(graph),
            cache,
            classifier,
            config,
        )
    }

    #[tokio::test]
    async fn test_retrieve_with_explicit_intent_and_vector_only_succeeds() {
        let dense = MockDenseIndexClient::new(vec![DenseFixture {
            namespace: "ns".into(),
            chunk_id: "c1".into(),
            vector: vec![0.0; crate::clients::DENSE_VECTOR_DIM],
        }]);
        let orchestrator = make_orchestrator(dense, MockSparseIndexClient::empty(), MockGraphStoreClient::new());

        let mut overrides = QueryOverrides::default();
        overrides.intent = Some(Intent::Factual);
        overrides.channels_enabled = Some(BTreeSet::from([ChannelName::Vector]));
        overrides.weight_profile = Some(WeightProfile {
            vector: 1.0,
            sparse: 0.0,
            graph_local: 0.0,
            graph_global: 0.0,
        });
        let query = Query::new("hello", "ns").unwrap().with_overrides(overrides);

        let result = orchestrator.retrieve(query, CancellationToken::new()).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_returns_no_signal_when_all_channels_disabled() {
        let orchestrator = make_orchestrator(
            MockDenseIndexClient::empty(),
            MockSparseIndexClient::empty(),
            MockGraphStoreClient::new(),
        );
        let mut overrides = QueryOverrides::default();
        overrides.channels_enabled = Some(BTreeSet::new());
        let query = Query::new("hello", "ns").unwrap().with_overrides(overrides);
        let err = orchestrator.retrieve(query, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "NO_SIGNAL");
    }

    #[tokio::test]
    async fn test_retrieve_degrades_gracefully_when_one_channel_fails() {
        let dense = MockDenseIndexClient::empty();
        dense.set_failure(ChannelError::Permanent("down".into()));
        let sparse = MockSparseIndexClient::new(vec![SparseFixture {
            namespace: "ns".into(),
            chunk_id: "c1".into(),
            terms: std::collections::HashMap::new(),
        }]);
        let orchestrator = make_orchestrator(dense, sparse, MockGraphStoreClient::new());

        let mut overrides = QueryOverrides::default();
        overrides.intent = Some(Intent::Keyword);
        overrides.channels_enabled = Some(BTreeSet::from([ChannelName::Vector, ChannelName::Sparse]));
        let query = Query::new("database pooling", "ns").unwrap().with_overrides(overrides);

        let result = orchestrator.retrieve(query, CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retrieve_respects_max_in_flight_backpressure() {
        let toml = r#"
[performance]
max_in_flight_requests = 1
[channels.dense_index]
base_url = "http://localhost:1"
[channels.sparse_index]
base_url = "http://localhost:2"
[channels.graph_store]
base_url = "http://localhost:3"
[channels.embedding]
base_url = "http://localhost:4"
"#;
        let orchestrator = RetrievalOrchestrator::new(
            Arc::new(MockEmbeddingClient::new()),
            Arc::new(MockDenseIndexClient::empty()),
            Arc::new(MockSparseIndexClient::empty()),
            Arc::new(MockGraphStoreClient::new()),
            Arc::new(RelevanceCache::new(100, Duration::from_secs(300))),
            Arc::new(IntentClassifier::with_defaults(0.80)),
            Arc::new(toml::from_str::<Config>(toml).unwrap()),
        );
        let _permit = orchestrator.semaphore.try_acquire().unwrap();
        let mut overrides = QueryOverrides::default();
        overrides.channels_enabled = Some(BTreeSet::from([ChannelName::Vector]));
        let query = Query::new("hello", "ns").unwrap().with_overrides(overrides);
        let err = orchestrator.retrieve(query, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "RESOURCE_EXHAUSTED");
    }

    /// Wraps a `DenseIndexClient` with a delay before delegating, so
    /// concurrent `retrieve` calls for the same key have a window to
    /// actually race each other rather than running back-to-back.
    struct SleepyDenseIndexClient<T> {
        inner: T,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl<T: DenseIndexClient> DenseIndexClient for SleepyDenseIndexClient<T> {
        async fn search(
            &self,
            namespace: &str,
            query_vector: &[f32],
            top_k: usize,
        ) -> std::result::Result<Vec<crate::clients::Hit>, ChannelError> {
            tokio::time::sleep(self.delay).await;
            self.inner.search(namespace, query_vector, top_k).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cache_misses_dispatch_exactly_once() {
        use crate::clients::mock::CallCountingSpy;

        let dense = Arc::new(SleepyDenseIndexClient {
            inner: CallCountingSpy::new(
                MockDenseIndexClient::new(vec![DenseFixture {
                    namespace: "ns".into(),
                    chunk_id: "c1".into(),
                    vector: vec![0.0; crate::clients::DENSE_VECTOR_DIM],
                }]),
                1,
            ),
            delay: Duration::from_millis(20),
        });
        let orchestrator = Arc::new(RetrievalOrchestrator::new(
            Arc::new(MockEmbeddingClient::new()),
            dense,
            Arc::new(MockSparseIndexClient::empty()),
            Arc::new(MockGraphStoreClient::new()),
            Arc::new(RelevanceCache::new(100, Duration::from_secs(300))),
            Arc::new(IntentClassifier::with_defaults(0.80)),
            Arc::new(test_config()),
        ));

        let mut overrides = QueryOverrides::default();
        overrides.intent = Some(Intent::Factual);
        overrides.channels_enabled = Some(BTreeSet::from([ChannelName::Vector]));
        overrides.weight_profile = Some(WeightProfile {
            vector: 1.0,
            sparse: 0.0,
            graph_local: 0.0,
            graph_global: 0.0,
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = orchestrator.clone();
            let overrides = overrides.clone();
            handles.push(tokio::spawn(async move {
                let query = Query::new("hello", "ns").unwrap().with_overrides(overrides);
                orchestrator.retrieve(query, CancellationToken::new()).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.len(), 1);
        }
        // The spy's call budget of 1 would have panicked inside one of the
        // spawned tasks (surfaced above as a JoinError) had a second waiter
        // ever re-promoted itself to leader and re-dispatched.
    }
}
