use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use qce_core::message::RawMessage;
use qce_core::{ChatRef, ChatType};

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::types::{ApiEnvelope, FriendEntry, GroupEntry, MediaDownloadRequest};

/// Numeric chat-type code on the wire: 1 = private, 2 = group.
fn chat_type_code(t: ChatType) -> u8 {
    match t {
        ChatType::Private => 1,
        ChatType::Group => 2,
    }
}

/// Wire shape of a peer reference.
fn peer_value(chat: &ChatRef) -> serde_json::Value {
    json!({
        "chatType": chat_type_code(chat.chat_type),
        "peerUid": chat.peer_uid,
        "guildId": chat.guild_id.clone().unwrap_or_default(),
    })
}

/// HTTP client for a NapCat-style bridge RPC endpoint.
///
/// Every call is `POST {base_url}/api/{method}` with a JSON body and an
/// optional bearer token.
pub struct HttpBridge {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBridge {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    async fn call<P: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<T> {
        self.call_with_timeout(method, params, None).await
    }

    async fn call_with_timeout<P: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
        timeout_ms: Option<u64>,
    ) -> Result<T> {
        let url = format!("{}/api/{}", self.base_url, method);
        debug!(%method, "bridge call");

        let mut builder = self.client.post(&url).json(params);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(ms) = timeout_ms {
            builder = builder.timeout(std::time::Duration::from_millis(ms));
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();

        match status {
            401 | 403 => {
                return Err(BridgeError::PermissionDenied(format!(
                    "{method} rejected with HTTP {status}"
                )))
            }
            404 => return Err(BridgeError::NotFound(format!("{method}: HTTP 404"))),
            429 => {
                let retry = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(5000);
                return Err(BridgeError::RateLimited {
                    retry_after_ms: retry,
                });
            }
            s if s >= 500 => {
                return Err(BridgeError::TransientNetwork(format!(
                    "{method}: HTTP {s}"
                )))
            }
            s if s >= 400 => {
                let body = resp.text().await.unwrap_or_default();
                warn!(%method, status = s, body = %body, "bridge API error");
                return Err(BridgeError::Protocol(format!("{method}: HTTP {s}")));
            }
            _ => {}
        }

        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| BridgeError::Protocol(format!("{method}: {e}")))?;

        if envelope.retcode != 0 {
            let msg = envelope.message.unwrap_or_default();
            return Err(BridgeError::Protocol(format!(
                "{method}: retcode {} ({msg})",
                envelope.retcode
            )));
        }
        envelope
            .data
            .ok_or_else(|| BridgeError::Protocol(format!("{method}: missing data field")))
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    async fn list_groups(&self) -> Result<Vec<GroupEntry>> {
        self.call("getGroups", &json!({})).await
    }

    async fn list_friends(&self) -> Result<Vec<FriendEntry>> {
        self.call("getFriends", &json!({})).await
    }

    async fn resolve_display_name(&self, chat: &ChatRef) -> Result<String> {
        match chat.chat_type {
            ChatType::Group => {
                let groups = self.list_groups().await?;
                Ok(groups
                    .into_iter()
                    .find(|g| g.group_code == chat.peer_uid)
                    .map(|g| g.group_name)
                    .unwrap_or_else(|| chat.peer_uid.clone()))
            }
            ChatType::Private => {
                let friends = self.list_friends().await?;
                Ok(friends
                    .into_iter()
                    .find(|f| f.uid == chat.peer_uid || f.uin.as_deref() == Some(&chat.peer_uid))
                    .map(|f| f.remark.filter(|r| !r.is_empty()).unwrap_or(f.nick))
                    .unwrap_or_else(|| chat.peer_uid.clone()))
            }
        }
    }

    async fn get_latest_messages(&self, chat: &ChatRef, count: usize) -> Result<Vec<RawMessage>> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            #[serde(default)]
            msg_list: Vec<RawMessage>,
        }
        let data: Data = self
            .call(
                "getAioFirstViewLatestMsgs",
                &json!({ "peer": peer_value(chat), "cnt": count }),
            )
            .await?;
        Ok(data.msg_list)
    }

    async fn get_message_history(
        &self,
        chat: &ChatRef,
        anchor_msg_id: &str,
        count: usize,
        forward: bool,
    ) -> Result<Vec<RawMessage>> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            #[serde(default)]
            msg_list: Vec<RawMessage>,
        }
        let data: Data = self
            .call(
                "getMsgHistory",
                &json!({
                    "peer": peer_value(chat),
                    "msgId": anchor_msg_id,
                    "cnt": count,
                    "queryOrder": forward,
                }),
            )
            .await?;
        Ok(data.msg_list)
    }

    async fn get_messages_by_seq_range(
        &self,
        chat: &ChatRef,
        seq_start: i64,
        seq_end: i64,
    ) -> Result<Vec<RawMessage>> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            #[serde(default)]
            msg_list: Vec<RawMessage>,
        }
        let data: Data = self
            .call(
                "getMsgsBySeqRange",
                &json!({
                    "peer": peer_value(chat),
                    "startSeq": seq_start.to_string(),
                    "endSeq": seq_end.to_string(),
                }),
            )
            .await?;
        Ok(data.msg_list)
    }

    async fn download_media(&self, req: &MediaDownloadRequest) -> Result<Option<String>> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            #[serde(default)]
            file_path: Option<String>,
        }
        let data: Data = self
            .call_with_timeout(
                "downloadMedia",
                &json!({
                    "msgId": req.msg_id,
                    "chatType": chat_type_code(req.chat_type),
                    "peerUid": req.peer_uid,
                    "elementId": req.element_id,
                    "filePath": req.dest_path,
                }),
                Some(req.timeout_ms),
            )
            .await?;
        Ok(data.file_path)
    }

    async fn resolve_ptt_url(
        &self,
        peer_uid: &str,
        file_uuid: &str,
        timeout_ms: u64,
    ) -> Result<String> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            url: String,
        }
        let data: Data = self
            .call_with_timeout(
                "getPttUrl",
                &json!({ "peerUid": peer_uid, "fileUuid": file_uuid }),
                Some(timeout_ms),
            )
            .await?;
        Ok(data.url)
    }
}
