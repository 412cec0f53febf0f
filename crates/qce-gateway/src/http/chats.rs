use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use qce_core::ChatType;

use crate::app::AppState;
use crate::http::ApiResult;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub chat_type: ChatType,
    pub peer_uid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
}

/// GET /api/chats — merged group and friend listing from the bridge.
pub async fn list_chats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ChatEntry>>> {
    let mut chats = Vec::new();

    for group in state.bridge.list_groups().await? {
        chats.push(ChatEntry {
            chat_type: ChatType::Group,
            peer_uid: group.group_code,
            name: group.group_name,
            member_count: group.member_count,
        });
    }
    for friend in state.bridge.list_friends().await? {
        let name = friend
            .remark
            .filter(|r| !r.is_empty())
            .unwrap_or(friend.nick);
        chats.push(ChatEntry {
            chat_type: ChatType::Private,
            peer_uid: friend.uid,
            name,
            member_count: None,
        });
    }
    Ok(Json(chats))
}
