//! Error taxonomy for the collection pipeline.
//!
//! Per-item errors stay inside the adapter boundary, per-source errors stay
//! inside the orchestrator, and only configuration problems are allowed to
//! be fatal — and only at startup.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    /// Request exceeded the per-attempt timeout. Retried.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection reset, DNS failure, TLS error and friends. Retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx, non-429 upstream status. Retried, then surfaced.
    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// The response parsed but didn't have the shape we expected. The item
    /// is dropped; the adapter keeps going.
    #[error("malformed upstream response: {0}")]
    UpstreamShape(String),

    /// All retry attempts consumed. Wraps the last observed cause.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<CollectError>,
    },

    /// Database write/read failure. The run reports partial success.
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Missing credential or invalid setting. Fatal at startup only.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CollectError {
    /// Whether a single failed attempt with this cause should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectError::Timeout(_)
                | CollectError::Transport(_)
                | CollectError::UpstreamStatus { .. }
        )
    }
}
