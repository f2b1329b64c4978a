use thiserror::Error;

/// Main error type for the retrieval core.
///
/// Mirrors the outbound error taxonomy: validation and deadline/backpressure
/// failures are meant to be surfaced to the caller as-is; channel, cache, and
/// classifier failures are recovered internally by the orchestrator and never
/// constructed at the `retrieve` boundary (see `orchestrator::RetrievalOutcome`).
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Malformed query: bad length, empty namespace, out-of-range top_k.
    #[error("validation error: {0}")]
    Validation(String),

    /// Three or more of the four channels failed; no signal to fuse.
    #[error("no signal: {0}")]
    NoSignal(String),

    /// The whole-request deadline elapsed before fusion completed.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// The in-flight request limit was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A single channel call failed (transient or permanent). Not surfaced to
    /// callers of `retrieve`; used internally to carry the failure reason
    /// into the per-request trace.
    #[error("channel {0} failed: {1}")]
    ChannelFailed(String, String),

    /// HTTP transport error from one of the client implementations.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Configuration errors (missing file, invalid TOML, out-of-range value).
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for conditions that should not occur given the invariants
    /// above (e.g. a poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenient Result type using RetrievalError.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Stable string error codes for the outbound interface (§6).
impl RetrievalError {
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::Validation(_) => "VALIDATION_ERROR",
            RetrievalError::NoSignal(_) => "NO_SIGNAL",
            RetrievalError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            RetrievalError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            RetrievalError::ChannelFailed(_, _) => "INTERNAL_ERROR",
            RetrievalError::Transport(_) => "INTERNAL_ERROR",
            RetrievalError::Config(_) => "INTERNAL_ERROR",
            RetrievalError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetrievalError::Config("bad toml".to_string());
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RetrievalError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(RetrievalError::NoSignal("x".into()).code(), "NO_SIGNAL");
        assert_eq!(
            RetrievalError::DeadlineExceeded(std::time::Duration::from_millis(1)).code(),
            "DEADLINE_EXCEEDED"
        );
        assert_eq!(
            RetrievalError::ResourceExhausted("x".into()).code(),
            "RESOURCE_EXHAUSTED"
        );
    }
}
