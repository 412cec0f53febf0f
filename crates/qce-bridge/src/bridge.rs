use async_trait::async_trait;

use qce_core::message::RawMessage;
use qce_core::ChatRef;

use crate::error::Result;
use crate::types::{FriendEntry, GroupEntry, MediaDownloadRequest};

/// Narrow capability set over the chat bridge RPC.
///
/// This trait is the compatibility seam: everything upstream-specific (RPC
/// method names, numeric chat-type codes, reply envelopes) stays behind it.
/// Implementations must be `Send + Sync` so one instance can serve the
/// fetcher and the resource downloader concurrently.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn list_groups(&self) -> Result<Vec<GroupEntry>>;

    async fn list_friends(&self) -> Result<Vec<FriendEntry>>;

    /// Best-effort chat title: group name, or friend remark/nick, falling
    /// back to the peer uid.
    async fn resolve_display_name(&self, chat: &ChatRef) -> Result<String>;

    /// Newest `count` messages of the chat — the anchor-free first page.
    async fn get_latest_messages(&self, chat: &ChatRef, count: usize) -> Result<Vec<RawMessage>>;

    /// Up to `count` messages older than (`forward == true`) the anchor.
    async fn get_message_history(
        &self,
        chat: &ChatRef,
        anchor_msg_id: &str,
        count: usize,
        forward: bool,
    ) -> Result<Vec<RawMessage>>;

    /// Messages in the inclusive sequence range `[seq_start, seq_end]`.
    async fn get_messages_by_seq_range(
        &self,
        chat: &ChatRef,
        seq_start: i64,
        seq_end: i64,
    ) -> Result<Vec<RawMessage>>;

    /// Ask the bridge to materialise a media element on local disk.
    /// Returns the path the bridge reports, when it reports one.
    async fn download_media(&self, req: &MediaDownloadRequest) -> Result<Option<String>>;

    /// Resolve a voice message's file uuid to a fetchable URL.
    async fn resolve_ptt_url(&self, peer_uid: &str, file_uuid: &str, timeout_ms: u64)
        -> Result<String>;
}
