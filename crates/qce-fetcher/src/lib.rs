//! `qce-fetcher` — strategy-driven history pagination.
//!
//! One [`MessageFetcher`] per export walks a chat's history newest-to-oldest
//! in bounded batches, applying the client-side filter, the configured retry
//! policy and the cooperative cancellation token. The iterator signals "end"
//! with `Ok(None)` — exhausted history, a passed window bound, the loop guard
//! and cancellation all end it cleanly.

pub mod error;
pub mod fetcher;
pub mod filter;
pub mod retry;
pub mod stats;
pub mod strategy;

pub use error::{FetchError, Result};
pub use fetcher::MessageFetcher;
pub use stats::StatsSnapshot;
pub use strategy::FetchStrategy;
