//! `qce-store` — SQLite persistence for tasks, resources and schedules.
//!
//! One connection behind a mutex: every write serialises, reads share the
//! same path. The store is the single source of truth; the engine's
//! in-memory task map is a cache rebuilt from it on startup. Progress
//! updates flow through [`writer::ProgressWriter`] so the pipeline never
//! blocks on disk.

pub mod db;
pub mod error;
mod rows;
pub mod store;
pub mod writer;

pub use error::{Result, StoreError};
pub use store::TaskStore;
pub use writer::{spawn_progress_writer, ProgressWriter};
