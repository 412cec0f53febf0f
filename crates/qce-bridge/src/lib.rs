//! `qce-bridge` — typed adapter over the chat bridge RPC.
//!
//! The [`Bridge`] trait is the only surface the rest of the workspace sees;
//! [`HttpBridge`] is the production implementation against a NapCat-style
//! HTTP endpoint. Tests substitute scripted implementations.

pub mod bridge;
pub mod client;
pub mod error;
pub mod types;

pub use bridge::Bridge;
pub use client::HttpBridge;
pub use error::{BridgeError, Result};
pub use types::{FriendEntry, GroupEntry, MediaDownloadRequest};
