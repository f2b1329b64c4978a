use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hybrid_retrieval_core::cache::RelevanceCache;
use hybrid_retrieval_core::clients::http::{
    HttpDenseIndexClient, HttpEmbeddingClient, HttpGraphStoreClient, HttpSparseIndexClient,
};
use hybrid_retrieval_core::intent::IntentClassifier;
use hybrid_retrieval_core::{Config, RetrievalOrchestrator};

/// Boots the retrieval core: loads configuration, wires the four HTTP-backed
/// channel clients plus the embedding client, and constructs the
/// `RetrievalOrchestrator`. This binary does not front a transport of its
/// own (no HTTP/RPC server) — `retrieve()` is meant to be called in-process
/// by an embedding application; this entrypoint exists to validate
/// configuration and keep the process alive under a supervisor.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    log::info!("starting hybrid-retrieval-core v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("failed to load configuration")?;
    log::info!(
        "configuration loaded: rrf_k={} cache_capacity={} channel_timeout_ms={}",
        config.fusion.rrf_k,
        config.cache.cache_capacity,
        config.performance.channel_timeout_ms
    );

    let _orchestrator = build_orchestrator(&config);
    log::info!("retrieval core ready");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    log::info!("shutdown signal received, exiting");

    Ok(())
}

fn build_orchestrator(config: &Config) -> RetrievalOrchestrator {
    let embedding = Arc::new(HttpEmbeddingClient::new(
        config.channels.embedding.base_url.clone(),
        Duration::from_millis(config.channels.embedding.timeout_ms),
    ));
    let dense_index = Arc::new(HttpDenseIndexClient::new(
        config.channels.dense_index.base_url.clone(),
        Duration::from_millis(config.channels.dense_index.timeout_ms),
    ));
    let sparse_index = Arc::new(HttpSparseIndexClient::new(
        config.channels.sparse_index.base_url.clone(),
        Duration::from_millis(config.channels.sparse_index.timeout_ms),
    ));
    let graph_store = Arc::new(HttpGraphStoreClient::new(
        config.channels.graph_store.base_url.clone(),
        Duration::from_millis(config.channels.graph_store.timeout_ms),
    ));
    let cache = Arc::new(RelevanceCache::new(config.cache.cache_capacity, config.cache_ttl()));
    let classifier = Arc::new(IntentClassifier::with_defaults(
        config.intent.intent_confidence_threshold,
    ));

    RetrievalOrchestrator::new(
        embedding,
        dense_index,
        sparse_index,
        graph_store,
        cache,
        classifier,
        Arc::new(config.clone()),
    )
}
