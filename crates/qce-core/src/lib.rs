//! `qce-core` — shared types, config and errors for the QQ chat exporter.
//!
//! Everything the subsystem crates exchange lives here: the chat/time
//! identifiers, the raw and parsed message models, resource and task records,
//! scheduled-export records, and the figment-backed configuration.

pub mod config;
pub mod error;
pub mod message;
pub mod resource;
pub mod sanitize;
pub mod schedule;
pub mod task;
pub mod types;

pub use error::{QceError, Result};
pub use types::{promote_millis, ChatRef, ChatType, TimeWindow};
