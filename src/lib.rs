pub mod cache;
pub mod channels;
pub mod clients;
pub mod config;
pub mod error;
pub mod fusion;
pub mod intent;
pub mod orchestrator;
pub mod types;

pub use config::Config;
pub use error::{Result, RetrievalError};
pub use orchestrator::RetrievalOrchestrator;
pub use types::{
    ChannelName, ChunkRef, Classification, FusedResult, Intent, Query, QueryOverrides,
    WeightProfile,
};
