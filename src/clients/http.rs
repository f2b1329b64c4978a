//! `reqwest`-backed implementations of the outbound client traits. Thin
//! JSON-over-HTTP wrappers, matching the teacher crate's `OpenAIEmbedder`
//! shape (`embeddings/openai.rs`): a shared `reqwest::Client`, a bounded
//! timeout, and errors mapped into the crate's own error type rather than
//! propagating `reqwest::Error` directly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    ChannelError, DenseIndexClient, EmbeddingClient, EntityMatch, ExpandMode, GraphStoreClient,
    Hit, SparseIndexClient, SparseQuery,
};

fn map_transport_error(err: &reqwest::Error) -> ChannelError {
    if err.is_timeout() || err.is_connect() {
        ChannelError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        if status.is_server_error() || status.as_u16() == 429 {
            ChannelError::Transient(format!("status {status}"))
        } else {
            ChannelError::Permanent(format!("status {status}"))
        }
    } else {
        ChannelError::Transient(err.to_string())
    }
}

/// Builds a `reqwest::Client` with a fixed per-call timeout, matching the
/// teacher's `Client::builder().timeout(...).build().expect(...)` pattern.
fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build HTTP client")
}

// ---- Embedding service ---------------------------------------------------

#[derive(Serialize)]
struct EmbedDenseRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedDenseResponse {
    vector: Vec<f32>,
}

#[derive(Serialize)]
struct EmbedSparseRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedSparseResponse {
    terms: SparseQuery,
}

pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_dense(&self, text: &str) -> Result<Vec<f32>, ChannelError> {
        let url = format!("{}/embed_dense", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedDenseRequest { text })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: EmbedDenseResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed.vector)
    }

    async fn embed_sparse(&self, text: &str) -> Result<SparseQuery, ChannelError> {
        let url = format!("{}/embed_sparse", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedSparseRequest { text })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: EmbedSparseResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed.terms)
    }
}

// ---- Dense index ----------------------------------------------------------

#[derive(Serialize)]
struct DenseSearchRequest<'a> {
    namespace: &'a str,
    query_vector: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct HitWire {
    chunk_id: String,
    score: f32,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<HitWire>,
}

pub struct HttpDenseIndexClient {
    client: Client,
    base_url: String,
}

impl HttpDenseIndexClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DenseIndexClient for HttpDenseIndexClient {
    async fn search(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&DenseSearchRequest {
                namespace,
                query_vector,
                top_k,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| Hit {
                chunk_id: h.chunk_id,
                score: h.score,
            })
            .collect())
    }
}

// ---- Sparse index ----------------------------------------------------------

#[derive(Serialize)]
struct SparseSearchRequest<'a> {
    namespace: &'a str,
    sparse_terms: &'a SparseQuery,
    top_k: usize,
}

pub struct HttpSparseIndexClient {
    client: Client,
    base_url: String,
}

impl HttpSparseIndexClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SparseIndexClient for HttpSparseIndexClient {
    async fn search(
        &self,
        namespace: &str,
        sparse_terms: &SparseQuery,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SparseSearchRequest {
                namespace,
                sparse_terms,
                top_k,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| Hit {
                chunk_id: h.chunk_id,
                score: h.score,
            })
            .collect())
    }
}

// ---- Graph store ------------------------------------------------------------

#[derive(Serialize)]
struct ResolveEntitiesRequest<'a> {
    text: &'a str,
    confidence_threshold: f32,
}

#[derive(Deserialize)]
struct EntityMatchWire {
    entity_id: String,
    confidence: f32,
}

#[derive(Deserialize)]
struct ResolveEntitiesResponse {
    matches: Vec<EntityMatchWire>,
}

#[derive(Serialize)]
struct ExpandRequest<'a> {
    namespace: &'a str,
    entity_ids: &'a [String],
    mode: &'static str,
    top_k: usize,
}

pub struct HttpGraphStoreClient {
    client: Client,
    base_url: String,
}

impl HttpGraphStoreClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl GraphStoreClient for HttpGraphStoreClient {
    async fn resolve_entities(
        &self,
        text: &str,
        confidence_threshold: f32,
    ) -> Result<Vec<EntityMatch>, ChannelError> {
        let url = format!("{}/resolve_entities", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ResolveEntitiesRequest {
                text,
                confidence_threshold,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: ResolveEntitiesResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| EntityMatch {
                entity_id: m.entity_id,
                confidence: m.confidence,
            })
            .collect())
    }

    async fn expand(
        &self,
        namespace: &str,
        entity_ids: &[String],
        mode: ExpandMode,
        top_k: usize,
    ) -> Result<Vec<Hit>, ChannelError> {
        let url = format!("{}/expand", self.base_url);
        let mode_str = match mode {
            ExpandMode::Local => "local",
            ExpandMode::Global => "global",
        };
        let response = self
            .client
            .post(&url)
            .json(&ExpandRequest {
                namespace,
                entity_ids,
                mode: mode_str,
                top_k,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let response = response.error_for_status().map_err(|e| map_transport_error(&e))?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Permanent(format!("malformed response: {e}")))?;
        Ok(parsed
            .hits
            .into_iter()
            .map(|h| Hit {
                chunk_id: h.chunk_id,
                score: h.score,
            })
            .collect())
    }
}
