use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::task::ExportFormat;
use crate::types::ChatRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
            ScheduleType::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "monthly" => Ok(ScheduleType::Monthly),
            "custom" => Ok(ScheduleType::Custom),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// Which relative time window a scheduled export covers on each firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeRangeType {
    Yesterday,
    LastWeek,
    LastMonth,
    #[serde(rename = "last-7-days")]
    Last7Days,
    #[serde(rename = "last-30-days")]
    Last30Days,
    Custom,
}

impl fmt::Display for TimeRangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeRangeType::Yesterday => "yesterday",
            TimeRangeType::LastWeek => "last-week",
            TimeRangeType::LastMonth => "last-month",
            TimeRangeType::Last7Days => "last-7-days",
            TimeRangeType::Last30Days => "last-30-days",
            TimeRangeType::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TimeRangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "yesterday" => Ok(TimeRangeType::Yesterday),
            "last-week" => Ok(TimeRangeType::LastWeek),
            "last-month" => Ok(TimeRangeType::LastMonth),
            "last-7-days" => Ok(TimeRangeType::Last7Days),
            "last-30-days" => Ok(TimeRangeType::Last30Days),
            "custom" => Ok(TimeRangeType::Custom),
            other => Err(format!("unknown time range type: {other}")),
        }
    }
}

/// A recurring export definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledExport {
    pub id: String,
    pub name: String,
    pub chat: ChatRef,
    pub schedule_type: ScheduleType,
    /// Local wall-clock "HH:mm" for daily/weekly/monthly schedules.
    pub execute_time: String,
    /// 5-field cron, required when `schedule_type == Custom`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    pub time_range_type: TimeRangeType,
    /// Second offsets relative to "now", used when `time_range_type == Custom`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_offset_start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_offset_end: Option<i64>,
    pub format: ExportFormat,
    #[serde(default)]
    pub options: Value,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Partial,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "partial" => Ok(ExecutionStatus::Partial),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One firing of a scheduled export, kept for the last 100 runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHistory {
    pub id: String,
    pub scheduled_export_id: String,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}
