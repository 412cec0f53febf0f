use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde_json::Value;

use qce_core::resource::ResourceInfo;
use qce_core::schedule::{ExecutionHistory, ScheduledExport};
use qce_core::task::{ExportTask, MessageFilter, TaskState};
use qce_core::{ChatRef, TimeWindow};

/// Map a parse failure on column `idx` into a rusqlite conversion error so
/// row mappers stay inside `rusqlite::Result`.
fn bad_col(idx: usize, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("{err}").into())
}

fn parse_str<T: std::str::FromStr>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>().map_err(|e| bad_col(idx, e))
}

fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| bad_col(idx, e))
}

fn parse_opt_time(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_time(idx, &v)).transpose()
}

/// Sender/type/keyword filter parts, stored as one JSON column.
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct FilterJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    senders: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keyword: Option<String>,
}

pub(crate) fn filter_to_json(filter: &MessageFilter) -> String {
    serde_json::to_string(&FilterJson {
        senders: filter.senders.clone(),
        types: filter.types.clone(),
        keyword: filter.keyword.clone(),
    })
    .unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn formats_to_csv(task: &ExportTask) -> String {
    task.formats
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Joined `export_task` × `export_task_state` row (task columns 0..=15,
/// state columns 16..=26).
pub(crate) fn row_to_task(row: &Row<'_>) -> rusqlite::Result<(ExportTask, TaskState)> {
    let task_id: String = row.get(0)?;
    let chat_type: String = row.get(1)?;
    let formats_csv: String = row.get(4)?;
    let filter_json: String = row.get(8)?;

    let mut formats = Vec::new();
    for part in formats_csv.split(',').filter(|p| !p.is_empty()) {
        formats.push(parse_str(4, part)?);
    }
    let extra: FilterJson = serde_json::from_str(&filter_json).unwrap_or_default();
    let window = TimeWindow {
        start_ms: row.get(5)?,
        end_ms: row.get(6)?,
    };

    let task = ExportTask {
        task_id: task_id.clone(),
        chat: ChatRef {
            chat_type: parse_str(1, &chat_type)?,
            peer_uid: row.get(2)?,
            guild_id: None,
        },
        chat_name: row.get(3)?,
        formats,
        filter: MessageFilter {
            window,
            include_recalled: row.get(7)?,
            senders: extra.senders,
            types: extra.types,
            keyword: extra.keyword,
        },
        batch_size: row.get::<_, i64>(9)? as usize,
        timeout_ms: row.get::<_, i64>(10)? as u64,
        retry_count: row.get::<_, i64>(11)? as u32,
        include_resource_links: row.get(12)?,
        output_dir: row.get(13)?,
        created_at: parse_time(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_time(15, &row.get::<_, String>(15)?)?,
    };

    let state = TaskState {
        task_id,
        status: parse_str(16, &row.get::<_, String>(16)?)?,
        progress: row.get::<_, i64>(17)? as u8,
        total_messages: row.get::<_, i64>(18)? as u64,
        processed_messages: row.get::<_, i64>(19)? as u64,
        success_count: row.get::<_, i64>(20)? as u64,
        failure_count: row.get::<_, i64>(21)? as u64,
        current_message_id: row.get(22)?,
        start_time: parse_opt_time(23, row.get(23)?)?,
        end_time: parse_opt_time(24, row.get(24)?)?,
        error: row.get(25)?,
        speed_mps: row.get(26)?,
    };

    Ok((task, state))
}

pub(crate) fn row_to_resource(row: &Row<'_>) -> rusqlite::Result<ResourceInfo> {
    Ok(ResourceInfo {
        md5: row.get(0)?,
        resource_type: parse_str(1, &row.get::<_, String>(1)?)?,
        file_name: row.get(2)?,
        file_size: row.get(3)?,
        mime_type: row.get(4)?,
        original_url: row.get(5)?,
        local_path: row.get(6)?,
        status: parse_str(7, &row.get::<_, String>(7)?)?,
        accessible: row.get(8)?,
        checked_at: parse_opt_time(9, row.get(9)?)?,
        download_attempts: row.get::<_, i64>(10)? as u32,
        last_error: row.get(11)?,
        element_id: None,
        source_path: None,
        file_uuid: None,
    })
}

pub(crate) fn row_to_scheduled(row: &Row<'_>) -> rusqlite::Result<ScheduledExport> {
    let options_json: String = row.get(11)?;
    Ok(ScheduledExport {
        id: row.get(0)?,
        name: row.get(1)?,
        chat: ChatRef {
            chat_type: parse_str(2, &row.get::<_, String>(2)?)?,
            peer_uid: row.get(3)?,
            guild_id: None,
        },
        schedule_type: parse_str(4, &row.get::<_, String>(4)?)?,
        cron_expression: row.get(5)?,
        execute_time: row.get(6)?,
        time_range_type: parse_str(7, &row.get::<_, String>(7)?)?,
        range_offset_start: row.get(8)?,
        range_offset_end: row.get(9)?,
        format: parse_str(10, &row.get::<_, String>(10)?)?,
        options: serde_json::from_str::<Value>(&options_json).unwrap_or(Value::Null),
        enabled: row.get(12)?,
        last_run: parse_opt_time(13, row.get(13)?)?,
        next_run: parse_opt_time(14, row.get(14)?)?,
        created_at: parse_time(15, &row.get::<_, String>(15)?)?,
        updated_at: parse_time(16, &row.get::<_, String>(16)?)?,
    })
}

pub(crate) fn row_to_history(row: &Row<'_>) -> rusqlite::Result<ExecutionHistory> {
    Ok(ExecutionHistory {
        id: row.get(0)?,
        scheduled_export_id: row.get(1)?,
        executed_at: parse_time(2, &row.get::<_, String>(2)?)?,
        status: parse_str(3, &row.get::<_, String>(3)?)?,
        message_count: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        file_path: row.get(5)?,
        file_size: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        error: row.get(7)?,
        duration_ms: row.get::<_, i64>(8)? as u64,
    })
}
