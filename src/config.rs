use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::types::{ChannelName, WeightProfile};

/// Top-level configuration for the retrieval core, loaded from
/// `config.toml` (or the path in `RETRIEVAL_CORE_CONFIG`) with `.env`
/// overrides, matching the teacher crate's `Config::load`/`validate`
/// idiom.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_rrf_k() -> usize {
    60
}

/// Per-intent weight profile overrides. Any intent omitted from config
/// falls back to the compiled-in predefined profile (see
/// `WeightProfile::for_intent`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeightsConfig {
    pub factual: Option<RawWeightProfile>,
    pub keyword: Option<RawWeightProfile>,
    pub exploratory: Option<RawWeightProfile>,
    pub summary: Option<RawWeightProfile>,
    pub unknown: Option<RawWeightProfile>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawWeightProfile {
    pub vector: f32,
    pub sparse: f32,
    pub graph_local: f32,
    pub graph_global: f32,
}

impl From<RawWeightProfile> for WeightProfile {
    fn from(raw: RawWeightProfile) -> Self {
        WeightProfile {
            vector: raw.vector,
            sparse: raw.sparse,
            graph_local: raw.graph_local,
            graph_global: raw.graph_global,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: default_channel_timeout_ms(),
            request_deadline_ms: default_request_deadline_ms(),
            max_in_flight_requests: default_max_in_flight_requests(),
        }
    }
}

fn default_channel_timeout_ms() -> u64 {
    2000
}

fn default_request_deadline_ms() -> u64 {
    5000
}

fn default_max_in_flight_requests() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    #[serde(default = "default_intent_confidence_threshold")]
    pub intent_confidence_threshold: f32,
    #[serde(default = "default_namespace_default")]
    pub namespace_default: String,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            intent_confidence_threshold: default_intent_confidence_threshold(),
            namespace_default: default_namespace_default(),
        }
    }
}

fn default_intent_confidence_threshold() -> f32 {
    0.80
}

fn default_namespace_default() -> String {
    "default".to_string()
}

/// Endpoint configuration for the HTTP-backed channel and embedding
/// clients.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    pub dense_index: EndpointConfig,
    pub sparse_index: EndpointConfig,
    pub graph_store: EndpointConfig,
    pub embedding: EmbeddingEndpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingEndpointConfig {
    pub base_url: String,
    #[serde(default = "default_channel_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_batch_size() -> usize {
    32
}

impl Config {
    /// Load configuration from file.
    ///
    /// Loads environment variables from `.env` (if present), then reads
    /// the config file from the path in `RETRIEVAL_CORE_CONFIG` or
    /// `./config.toml`.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RETRIEVAL_CORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str).context("failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fusion.rrf_k < 1 {
            anyhow::bail!("fusion.rrf_k must be at least 1");
        }
        if self.intent.intent_confidence_threshold < 0.0
            || self.intent.intent_confidence_threshold > 1.0
        {
            anyhow::bail!("intent.intent_confidence_threshold must be between 0.0 and 1.0");
        }
        if self.intent.namespace_default.trim().is_empty() {
            anyhow::bail!("intent.namespace_default must be non-empty");
        }
        if self.cache.cache_capacity == 0 {
            anyhow::bail!("cache.cache_capacity must be greater than 0");
        }
        if self.performance.channel_timeout_ms == 0 {
            anyhow::bail!("performance.channel_timeout_ms must be greater than 0");
        }
        if self.performance.request_deadline_ms < self.performance.channel_timeout_ms {
            anyhow::bail!(
                "performance.request_deadline_ms must be >= performance.channel_timeout_ms"
            );
        }
        if self.performance.max_in_flight_requests == 0 {
            anyhow::bail!("performance.max_in_flight_requests must be greater than 0");
        }
        for (label, raw) in [
            ("weights.factual", self.weights.factual),
            ("weights.keyword", self.weights.keyword),
            ("weights.exploratory", self.weights.exploratory),
            ("weights.summary", self.weights.summary),
            ("weights.unknown", self.weights.unknown),
        ] {
            if let Some(raw) = raw {
                let profile: WeightProfile = raw.into();
                let sum = profile.sum();
                if (sum - 1.0).abs() > 1e-6 {
                    anyhow::bail!("{label} weights must sum to 1.0, got {sum}");
                }
            }
        }
        Ok(())
    }

    /// Resolve the weight profile for an intent, applying any config
    /// override, else the compiled-in predefined profile.
    pub fn weight_profile_for(&self, intent: crate::types::Intent) -> WeightProfile {
        use crate::types::Intent;
        let override_raw = match intent {
            Intent::Factual => self.weights.factual,
            Intent::Keyword => self.weights.keyword,
            Intent::Exploratory => self.weights.exploratory,
            Intent::Summary => self.weights.summary,
            Intent::Unknown => self.weights.unknown,
        };
        override_raw
            .map(WeightProfile::from)
            .unwrap_or_else(|| WeightProfile::for_intent(intent))
    }

    pub fn channel_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.performance.channel_timeout_ms)
    }

    pub fn request_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.performance.request_deadline_ms)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache.cache_ttl_seconds)
    }
}

/// All four channels, for iterating config/weight lookups.
pub const ALL_CHANNELS: [ChannelName; 4] = ChannelName::ALL;
