pub mod relevance_cache;

pub use relevance_cache::{cache_key, normalize_query, CacheEntry, RelevanceCache};
