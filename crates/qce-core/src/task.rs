use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{ChatRef, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Json,
    Txt,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
            ExportFormat::Html => "html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Txt => "TXT",
            ExportFormat::Html => "HTML",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(ExportFormat::Json),
            "TXT" => Ok(ExportFormat::Txt),
            "HTML" => Ok(ExportFormat::Html),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

/// Client-side message filter applied per fetched batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageFilter {
    pub window: TimeWindow,
    pub include_recalled: bool,
    /// Keep only messages from these sender uids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub senders: Option<Vec<String>>,
    /// Keep only messages containing at least one element of these kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    /// Case-insensitive substring over a JSON rendering of the elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl MessageFilter {
    /// Whether anything beyond the time window is constrained — drives the
    /// fetch strategy choice.
    pub fn has_content_constraints(&self) -> bool {
        self.senders.as_ref().is_some_and(|s| !s.is_empty())
            || self.types.as_ref().is_some_and(|t| !t.is_empty())
            || self.keyword.as_ref().is_some_and(|k| !k.is_empty())
    }
}

/// One export job. Created on request, mutated only by the orchestrator,
/// deleted only on explicit user action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTask {
    pub task_id: String,
    pub chat: ChatRef,
    pub chat_name: String,
    pub formats: Vec<ExportFormat>,
    pub filter: MessageFilter,
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub include_resource_links: bool,
    pub output_dir: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportTask {
    /// UUIDv7 — time-sortable, so task listings and log lines correlate.
    pub fn generate_id() -> String {
        Uuid::now_v7().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Mutable task progress, persisted alongside the task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub total_messages: u64,
    pub processed_messages: u64,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub speed_mps: f64,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            total_messages: 0,
            processed_messages: 0,
            success_count: 0,
            failure_count: 0,
            current_message_id: None,
            start_time: None,
            end_time: None,
            error: None,
            speed_mps: 0.0,
        }
    }

    pub fn set_progress(&mut self, pct: u8) {
        self.progress = pct.min(100);
    }

    /// Record processed count, clamped so it never exceeds the known total.
    pub fn set_processed(&mut self, processed: u64) {
        self.processed_messages = if self.total_messages > 0 {
            processed.min(self.total_messages)
        } else {
            processed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_never_exceeds_total() {
        let mut st = TaskState::new("t1");
        st.total_messages = 10;
        st.set_processed(25);
        assert_eq!(st.processed_messages, 10);
    }

    #[test]
    fn progress_clamped_to_100() {
        let mut st = TaskState::new("t1");
        st.set_progress(150);
        assert_eq!(st.progress, 100);
    }

    #[test]
    fn filter_content_constraints() {
        let mut f = MessageFilter::default();
        assert!(!f.has_content_constraints());
        f.keyword = Some("hello".into());
        assert!(f.has_content_constraints());
        f.keyword = Some(String::new());
        assert!(!f.has_content_constraints());
    }
}
