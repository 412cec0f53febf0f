//! `qce-resources` — content-addressed media storage and downloading.
//!
//! Every resource a parsed message references ends in exactly one of two
//! states: an integrity-checked file under the content-addressed store, or
//! `failed` with a classified error on its record. A bounded worker pool
//! drains a priority queue behind a circuit breaker; a periodic scan demotes
//! files that rot on disk.

pub mod breaker;
pub mod downloader;
pub mod error;
pub mod queue;
pub mod store;

pub use breaker::CircuitBreaker;
pub use downloader::{cleanup_cache, scan_downloaded, spawn_health_scan, ResourceHandler};
pub use error::{ResourceError, Result};
pub use queue::{DownloadQueue, DownloadTask};
pub use store::ResourceStore;
