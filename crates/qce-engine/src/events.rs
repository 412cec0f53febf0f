use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_EXPORT_PROGRESS: &str = "export_progress";
pub const EVENT_EXPORT_COMPLETE: &str = "export_complete";
pub const EVENT_EXPORT_ERROR: &str = "export_error";

/// WS envelope: `{ "type": "...", "data": {...}, "timestamp": 1700000000000 }`.
#[derive(Debug, Clone, Serialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    /// Emission time, unix millis.
    pub timestamp: i64,
}

impl WsEvent {
    pub fn new(event_type: &str, data: impl Serialize) -> Self {
        Self {
            event_type: event_type.to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Payload of every export_* event. Key names are part of the front-end
/// contract — do not rename.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEventData {
    pub task_id: String,
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape_is_stable() {
        let event = WsEvent::new(
            EVENT_EXPORT_PROGRESS,
            ExportEventData {
                task_id: "t1".into(),
                status: "running".into(),
                progress: 40,
                message: Some("fetching".into()),
                ..Default::default()
            },
        );
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "export_progress");
        assert_eq!(value["data"]["taskId"], "t1");
        assert_eq!(value["data"]["status"], "running");
        assert_eq!(value["data"]["progress"], 40);
        assert!(value["timestamp"].is_i64());
        // Optional keys are omitted entirely, not null.
        assert!(value["data"].get("fileSize").is_none());
    }

    #[test]
    fn complete_payload_keys_are_camel_case() {
        let data = ExportEventData {
            task_id: "t1".into(),
            status: "completed".into(),
            progress: 100,
            message_count: Some(3),
            file_name: Some("chat_1.json".into()),
            file_size: Some(1024),
            download_url: Some("/exports/chat_1.json".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        for key in ["taskId", "messageCount", "fileName", "fileSize", "downloadUrl"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
