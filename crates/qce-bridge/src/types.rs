use serde::{Deserialize, Serialize};

/// One group chat the account belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub group_code: String,
    pub group_name: String,
    #[serde(default)]
    pub member_count: Option<u32>,
}

/// One friend (private chat peer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub uid: String,
    #[serde(default)]
    pub uin: Option<String>,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Parameters for a media download executed by the bridge.
///
/// The bridge runs on the same host and writes the file itself; the reply
/// carries the path it actually wrote (which may differ from `dest_path`).
#[derive(Debug, Clone)]
pub struct MediaDownloadRequest {
    pub msg_id: String,
    pub chat_type: qce_core::ChatType,
    pub peer_uid: String,
    pub element_id: String,
    pub dest_path: String,
    pub timeout_ms: u64,
}

/// Standard reply envelope of the bridge RPC endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}
