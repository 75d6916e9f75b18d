//! Rate-limited, retrying HTTP layer shared by all marketplace adapters.

pub mod fetcher;
pub mod rate_limit;

pub use fetcher::{RetryConfig, RetryingFetcher};
pub use rate_limit::TokenBucket;
