use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hybrid_retrieval_core::cache::RelevanceCache;
use hybrid_retrieval_core::clients::mock::{
    DenseFixture, MockDenseIndexClient, MockEmbeddingClient, MockGraphStoreClient,
    MockSparseIndexClient, SparseFixture,
};
use hybrid_retrieval_core::clients::DENSE_VECTOR_DIM;
use hybrid_retrieval_core::intent::IntentClassifier;
use hybrid_retrieval_core::{Config, Query, RetrievalOrchestrator};
use tokio_util::sync::CancellationToken;

/// Run a single retrieval query against an in-memory fixture, for local
/// exploration of fusion/intent behavior without standing up the four
/// backing services.
#[derive(Parser)]
#[command(name = "query", about = "Run one retrieval query against a demo fixture")]
struct Args {
    /// Query text.
    text: String,

    /// Namespace to search within.
    #[arg(long, default_value = "demo")]
    namespace: String,

    /// Number of fused results to return.
    #[arg(long, default_value_t = 10)]
    top_k: usize,
}

fn build_fixture_orchestrator(config: Config) -> RetrievalOrchestrator {
    let embedding = Arc::new(
        MockEmbeddingClient::new()
            .with_dense("rust ownership model", vec![1.0; DENSE_VECTOR_DIM])
            .with_dense("garbage collection tradeoffs", vec![0.5; DENSE_VECTOR_DIM]),
    );

    let dense_index = Arc::new(MockDenseIndexClient::new(vec![
        DenseFixture {
            namespace: "demo".into(),
            chunk_id: "chunk-ownership".into(),
            vector: vec![1.0; DENSE_VECTOR_DIM],
        },
        DenseFixture {
            namespace: "demo".into(),
            chunk_id: "chunk-gc".into(),
            vector: vec![0.5; DENSE_VECTOR_DIM],
        },
    ]));

    let sparse_index = Arc::new(MockSparseIndexClient::new(vec![SparseFixture {
        namespace: "demo".into(),
        chunk_id: "chunk-ownership".into(),
        terms: [(1u32, 2.0f32)].into_iter().collect(),
    }]));

    let graph_store = Arc::new(
        MockGraphStoreClient::new()
            .with_mention("rust", "entity-rust", 0.9)
            .with_local_chunks("demo", "entity-rust", vec!["chunk-ownership".into()])
            .with_community("entity-rust", "community-systems-languages")
            .with_global_chunks(
                "demo",
                "community-systems-languages",
                vec!["chunk-ownership".into(), "chunk-gc".into()],
            ),
    );

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
        Arc::new(config),
    )
}

fn demo_config() -> Config {
    let toml = r#"
[channels.dense_index]
base_url = "http://localhost:9001"
[channels.sparse_index]
base_url = "http://localhost:9002"
[channels.graph_store]
base_url = "http://localhost:9003"
[channels.embedding]
base_url = "http://localhost:9004"
"#;
    toml::from_str(toml).expect("demo config literal must parse")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let config = demo_config();
    let orchestrator = build_fixture_orchestrator(config);

    let query = Query::with_top_k(args.text, args.namespace, args.top_k)
        .context("invalid query")?;

    let deadline = Duration::from_secs(5);
    let result = tokio::time::timeout(deadline, orchestrator.retrieve(query, CancellationToken::new()))
        .await
        .context("query timed out")?
        .context("retrieval failed")?;

    println!("{} result(s):", result.len());
    for entry in &result.entries {
        let provenance: Vec<&str> = entry.provenance().iter().map(|c| c.as_str()).collect();
        println!(
            "  {:<20} score={:.5} channels=[{}]",
            entry.chunk_id,
            entry.fused_score,
            provenance.join(", ")
        );
    }

    Ok(())
}
