use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::resource::ResourceInfo;
use crate::types::{promote_millis, ChatType};

/// Deserialize an integer that the bridge may encode as either a JSON number
/// or a decimal string (`"msgSeq": "102"` and `"msgSeq": 102` both occur).
pub fn string_or_i64<'de, D>(de: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}

fn opt_string_or_i64<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "string_or_i64")] i64);
    Option::<Wrap>::deserialize(de).map(|o| o.map(|w| w.0))
}

/// One message as returned by the bridge, untouched apart from field typing.
///
/// Everything beyond the identifying/ordering fields is opaque to the core;
/// the parser is the only consumer of `elements`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub msg_id: String,
    #[serde(deserialize_with = "string_or_i64")]
    pub msg_seq: i64,
    #[serde(deserialize_with = "opt_string_or_i64")]
    pub client_seq: Option<i64>,
    /// Seconds since epoch (the bridge's unit; promoted to millis on parse).
    #[serde(deserialize_with = "string_or_i64")]
    pub msg_time: i64,
    pub sender_uid: String,
    pub sender_uin: Option<String>,
    pub send_nick_name: Option<String>,
    /// Group card (per-group display name), group chats only.
    pub send_member_name: Option<String>,
    pub send_remark_name: Option<String>,
    pub msg_type: i32,
    pub elements: Vec<MessageElement>,
    #[serde(deserialize_with = "opt_string_or_i64")]
    pub recall_time: Option<i64>,
    /// Referenced messages carried alongside a reply element.
    pub records: Option<Vec<RawMessage>>,
    pub chat_type: Option<ChatType>,
    pub peer_uid: Option<String>,
}

impl RawMessage {
    /// Message timestamp in milliseconds (seconds-scale input promoted).
    pub fn time_millis(&self) -> i64 {
        promote_millis(self.msg_time)
    }

    pub fn is_recalled(&self) -> bool {
        self.recall_time.is_some_and(|t| t > 0)
    }
}

/// Mention target of a text element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtType {
    #[default]
    None,
    All,
    User,
}

/// The recognised element variants of the bridge's element union.
///
/// Field sets mirror what the upstream actually sends; optional fields are
/// absent more often than not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Text {
        #[serde(default)]
        content: String,
        #[serde(default)]
        at_type: AtType,
        #[serde(default)]
        at_uid: Option<String>,
    },
    Picture {
        #[serde(default)]
        file_name: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        file_size: Option<i64>,
        #[serde(default)]
        md5: String,
        #[serde(default)]
        element_id: String,
        #[serde(default)]
        source_path: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    File {
        #[serde(default)]
        file_name: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        file_size: Option<i64>,
        #[serde(default)]
        md5: String,
        #[serde(default)]
        element_id: String,
        #[serde(default)]
        source_path: Option<String>,
    },
    Video {
        #[serde(default)]
        file_name: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        file_size: Option<i64>,
        #[serde(default)]
        md5: String,
        #[serde(default)]
        element_id: String,
        #[serde(default)]
        source_path: Option<String>,
    },
    Voice {
        #[serde(default)]
        file_name: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        file_size: Option<i64>,
        #[serde(default)]
        md5: String,
        #[serde(default)]
        element_id: String,
        #[serde(default)]
        file_uuid: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        duration_secs: Option<i64>,
    },
    /// Built-in sticker, identified by a numeric face id.
    Face {
        #[serde(deserialize_with = "string_or_i64")]
        face_id: i64,
        #[serde(default)]
        name: Option<String>,
    },
    MarketFace {
        #[serde(default)]
        emoji_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        static_url: Option<String>,
    },
    Reply {
        #[serde(default)]
        source_msg_id: Option<String>,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        reply_msg_seq: Option<i64>,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        reply_msg_client_seq: Option<i64>,
        #[serde(default)]
        sender_name: Option<String>,
    },
    /// Structured card; payload is the raw JSON string the client renders.
    ArkCard {
        #[serde(default)]
        payload: String,
    },
    MultiForward {
        #[serde(default)]
        res_id: Option<String>,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        source_msg_ids: Vec<String>,
    },
    Location {
        lat: f64,
        lon: f64,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    /// System notice ("X recalled a message", "Y joined the group", ...).
    GrayTip {
        #[serde(default)]
        text: String,
    },
    Markdown {
        #[serde(default)]
        content: String,
    },
    Calendar {
        #[serde(default)]
        summary: String,
        #[serde(default, deserialize_with = "opt_string_or_i64")]
        start_time: Option<i64>,
        #[serde(default)]
        description: Option<String>,
    },
}

/// A bridge element: a recognised variant or a preserved unknown tag.
///
/// Unknown tags must survive the round trip — they land in the parsed
/// output's `special` bucket rather than being dropped, so upstream protocol
/// additions never silently lose data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageElement {
    Known(Element),
    Unknown(Value),
}

impl MessageElement {
    pub fn text(content: impl Into<String>) -> Self {
        MessageElement::Known(Element::Text {
            content: content.into(),
            at_type: AtType::None,
            at_uid: None,
        })
    }

    /// Short tag used in type filters and `special` markers.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageElement::Known(el) => match el {
                Element::Text { .. } => "text",
                Element::Picture { .. } => "picture",
                Element::File { .. } => "file",
                Element::Video { .. } => "video",
                Element::Voice { .. } => "voice",
                Element::Face { .. } => "face",
                Element::MarketFace { .. } => "market_face",
                Element::Reply { .. } => "reply",
                Element::ArkCard { .. } => "ark_card",
                Element::MultiForward { .. } => "multi_forward",
                Element::Location { .. } => "location",
                Element::GrayTip { .. } => "gray_tip",
                Element::Markdown { .. } => "markdown",
                Element::Calendar { .. } => "calendar",
            },
            MessageElement::Unknown(_) => "unknown",
        }
    }
}

/// Resolved sender identity. `display_name` follows the priority
/// group card → remark → nickname → uin → uid → "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub uid: String,
    pub uin: Option<String>,
    pub display_name: String,
    pub nickname: Option<String>,
    pub group_card: Option<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverInfo {
    pub uid: String,
    pub chat_type: Option<ChatType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    /// None for @all.
    pub uid: Option<String>,
    pub all: bool,
    pub text: String,
}

/// Resolved (or unresolved) reply reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyInfo {
    pub message_id: Option<String>,
    /// Id of the referenced message when resolution succeeded, else None.
    pub referenced_message_id: Option<String>,
    pub sender_name: String,
    /// Truncated rendering of the referenced message, or the literal
    /// "original message" when unresolved.
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmojiKind {
    Face,
    MarketFace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiRef {
    pub id: String,
    pub name: Option<String>,
    pub kind: EmojiKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    pub lat: f64,
    pub lon: f64,
    pub title: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiForwardInfo {
    pub res_id: Option<String>,
    pub summary: Option<String>,
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarInfo {
    pub summary: String,
    pub start_time: Option<i64>,
    pub description: Option<String>,
}

/// Catch-all bucket entry: unknown element tags and element-level parse
/// failures (`kind = "error_<elementType>"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialEntry {
    pub kind: String,
    pub data: Value,
}

/// Rendered message content plus everything discovered during the element pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Mention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emojis: Vec<EmojiRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_forward: Option<MultiForwardInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub special: Vec<SpecialEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStats {
    pub element_count: usize,
    pub resource_count: usize,
    pub text_length: usize,
    pub processing_millis: u64,
}

/// The normalised message model consumed by exporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub message_id: String,
    pub message_seq: i64,
    /// Absolute timestamp in milliseconds.
    pub timestamp: i64,
    pub sender: SenderInfo,
    pub receiver: ReceiverInfo,
    pub message_type: i32,
    pub is_system: bool,
    pub is_recalled: bool,
    pub is_temp: bool,
    pub content: MessageContent,
    pub stats: ParseStats,
    /// Original bridge JSON, kept only when debug capture is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_ref: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_accepts_string_numbers() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"msgId":"M1","msgSeq":"102","msgTime":"1700000030","senderUid":"u1","msgType":2,"elements":[]}"#,
        )
        .unwrap();
        assert_eq!(raw.msg_seq, 102);
        assert_eq!(raw.time_millis(), 1_700_000_030_000);
    }

    #[test]
    fn unknown_element_tag_is_preserved() {
        let els: Vec<MessageElement> = serde_json::from_str(
            r#"[{"type":"text","content":"hi"},{"type":"hologram","payload":42}]"#,
        )
        .unwrap();
        assert_eq!(els[0].kind(), "text");
        assert_eq!(els[1].kind(), "unknown");
        match &els[1] {
            MessageElement::Unknown(v) => assert_eq!(v["payload"], 42),
            _ => panic!("expected unknown variant"),
        }
    }

    #[test]
    fn recall_flag_from_recall_time() {
        let mut raw = RawMessage::default();
        assert!(!raw.is_recalled());
        raw.recall_time = Some(1_700_000_000);
        assert!(raw.is_recalled());
    }
}
