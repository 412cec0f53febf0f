use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use qce_core::resource::ResourceInfo;
use qce_core::schedule::{ExecutionHistory, ScheduledExport};
use qce_core::task::{ExportTask, TaskState, TaskStatus};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::rows::{
    filter_to_json, formats_to_csv, row_to_history, row_to_resource, row_to_scheduled, row_to_task,
};

/// Kept history rows per scheduled export.
const HISTORY_LIMIT: usize = 100;

const TASK_COLUMNS: &str = "t.task_id, t.chat_type, t.peer_uid, t.chat_name, t.formats_csv,
     t.window_start_ms, t.window_end_ms, t.include_recalled, t.filter_json,
     t.batch_size, t.timeout_ms, t.retry_count, t.include_links, t.output_dir,
     t.created_at, t.updated_at,
     s.status, s.progress_pct, s.total_msgs, s.processed_msgs, s.success,
     s.failure, s.current_msg_id, s.start_time, s.end_time, s.error, s.speed_mps";

const SCHEDULED_COLUMNS: &str = "id, name, chat_type, peer_uid, schedule_type, cron_expr,
     execute_time, time_range_type, range_offset_start, range_offset_end,
     format, options_json, enabled, last_run, next_run, created_at, updated_at";

/// Single-writer task store over one SQLite file.
///
/// All writes serialise through the connection mutex; reads share it too —
/// sufficient for a single-node service, and it keeps the store the one
/// source of truth the in-memory task map is rebuilt from.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- export tasks ------------------------------------------------------

    /// Insert or update a task together with its state, atomically.
    pub fn upsert_task(&self, task: &ExportTask, state: &TaskState) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO export_task
             (task_id, chat_type, peer_uid, chat_name, formats_csv,
              window_start_ms, window_end_ms, include_recalled, filter_json,
              batch_size, timeout_ms, retry_count, include_links, output_dir,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)
             ON CONFLICT(task_id) DO UPDATE SET
               chat_name = excluded.chat_name,
               formats_csv = excluded.formats_csv,
               window_start_ms = excluded.window_start_ms,
               window_end_ms = excluded.window_end_ms,
               include_recalled = excluded.include_recalled,
               filter_json = excluded.filter_json,
               batch_size = excluded.batch_size,
               timeout_ms = excluded.timeout_ms,
               retry_count = excluded.retry_count,
               include_links = excluded.include_links,
               output_dir = excluded.output_dir,
               updated_at = excluded.updated_at",
            params![
                task.task_id,
                task.chat.chat_type.to_string(),
                task.chat.peer_uid,
                task.chat_name,
                formats_to_csv(task),
                task.filter.window.start_ms,
                task.filter.window.end_ms,
                task.filter.include_recalled,
                filter_to_json(&task.filter),
                task.batch_size as i64,
                task.timeout_ms as i64,
                task.retry_count as i64,
                task.include_resource_links,
                task.output_dir,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        upsert_state(&tx, state)?;
        tx.commit()?;
        debug!(task_id = %task.task_id, "task upserted");
        Ok(())
    }

    /// Update only the state row. A missing row is not an error — the task
    /// may have been deleted while a progress write was in flight.
    pub fn update_state(&self, state: &TaskState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_state(&conn, state)?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<(ExportTask, TaskState)>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM export_task t
             JOIN export_task_state s USING (task_id)
             WHERE t.task_id = ?1"
        );
        match conn.query_row(&sql, params![task_id], row_to_task) {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<(ExportTask, TaskState)>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM export_task t
             JOIN export_task_state s USING (task_id)
             ORDER BY t.created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<(ExportTask, TaskState)>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM export_task t
             JOIN export_task_state s USING (task_id)
             WHERE s.status = ?1
             ORDER BY t.created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.to_string()], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM export_task WHERE task_id = ?1", [task_id])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("task {task_id}"),
            });
        }
        info!(task_id, "task deleted");
        Ok(())
    }

    /// Crash recovery: any task still `running` in the store was orphaned by
    /// a dead process. Mark it failed; no events are emitted for these.
    pub fn mark_orphaned_running(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE export_task_state
             SET status = 'failed', error = 'orphaned', end_time = ?1
             WHERE status = 'running'",
            [&now],
        )?;
        if n > 0 {
            warn!(count = n, "orphaned running tasks marked failed");
        }
        Ok(n)
    }

    // --- resources ---------------------------------------------------------

    /// Upsert a resource record keyed by md5. Hash-less resources are kept
    /// in memory only — without a content address there is nothing stable to
    /// key the row on.
    pub fn upsert_resource(&self, res: &ResourceInfo) -> Result<()> {
        if res.md5.is_empty() {
            debug!(file = %res.file_name, "skipping persist of md5-less resource");
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO resource
             (md5, type, file_name, file_size, mime, original_url, local_path,
              status, accessible, checked_at, download_attempts, last_error)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(md5) DO UPDATE SET
               type = excluded.type,
               file_name = excluded.file_name,
               file_size = excluded.file_size,
               mime = excluded.mime,
               original_url = excluded.original_url,
               local_path = excluded.local_path,
               status = excluded.status,
               accessible = excluded.accessible,
               checked_at = excluded.checked_at,
               download_attempts = excluded.download_attempts,
               last_error = excluded.last_error",
            params![
                res.md5,
                res.resource_type.to_string(),
                res.file_name,
                res.file_size,
                res.mime_type,
                res.original_url,
                res.local_path,
                res.status.to_string(),
                res.accessible,
                res.checked_at.map(|t| t.to_rfc3339()),
                res.download_attempts as i64,
                res.last_error,
            ],
        )?;
        Ok(())
    }

    pub fn get_resource(&self, md5: &str) -> Result<Option<ResourceInfo>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT md5, type, file_name, file_size, mime, original_url, local_path,
                    status, accessible, checked_at, download_attempts, last_error
             FROM resource WHERE md5 = ?1",
            [md5],
            row_to_resource,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_resources(&self, status: Option<&str>) -> Result<Vec<ResourceInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = conn.prepare(
                    "SELECT md5, type, file_name, file_size, mime, original_url, local_path,
                            status, accessible, checked_at, download_attempts, last_error
                     FROM resource WHERE status = ?1",
                )?;
                let rows = stmt.query_map([s], row_to_resource)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT md5, type, file_name, file_size, mime, original_url, local_path,
                            status, accessible, checked_at, download_attempts, last_error
                     FROM resource",
                )?;
                let rows = stmt.query_map([], row_to_resource)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    /// Drop resource rows not checked within `days`. Opt-in maintenance;
    /// returns the number of rows removed.
    pub fn delete_expired_resources(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM resource WHERE checked_at IS NOT NULL AND checked_at < ?1",
            [&cutoff],
        )?;
        if n > 0 {
            info!(count = n, days, "expired resources removed");
        }
        Ok(n)
    }

    // --- scheduled exports -------------------------------------------------

    pub fn create_scheduled(&self, sched: &ScheduledExport) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scheduled_export
             (id, name, chat_type, peer_uid, schedule_type, cron_expr, execute_time,
              time_range_type, range_offset_start, range_offset_end, format,
              options_json, enabled, last_run, next_run, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            rusqlite::params_from_iter(scheduled_values(sched)),
        )?;
        info!(id = %sched.id, name = %sched.name, "scheduled export created");
        Ok(())
    }

    pub fn update_scheduled(&self, sched: &ScheduledExport) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE scheduled_export SET
               name = ?2, chat_type = ?3, peer_uid = ?4, schedule_type = ?5,
               cron_expr = ?6, execute_time = ?7, time_range_type = ?8,
               range_offset_start = ?9, range_offset_end = ?10, format = ?11,
               options_json = ?12, enabled = ?13, last_run = ?14, next_run = ?15,
               updated_at = ?17
             WHERE id = ?1",
            rusqlite::params_from_iter(scheduled_values(sched)),
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("scheduled export {}", sched.id),
            });
        }
        Ok(())
    }

    pub fn delete_scheduled(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM scheduled_export WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("scheduled export {id}"),
            });
        }
        Ok(())
    }

    pub fn get_scheduled(&self, id: &str) -> Result<Option<ScheduledExport>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_export WHERE id = ?1");
        match conn.query_row(&sql, [id], row_to_scheduled) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_scheduled(&self, enabled_only: bool) -> Result<Vec<ScheduledExport>> {
        let conn = self.conn.lock().unwrap();
        let sql = if enabled_only {
            format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_export WHERE enabled = 1 ORDER BY created_at")
        } else {
            format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_export ORDER BY created_at")
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_scheduled)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_export SET next_run = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id,
                next_run.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record one firing: append history, prune to the last 100 rows, and
    /// advance `last_run`/`next_run` — all inside a single transaction so a
    /// `last_run` can never exist without its history row.
    pub fn complete_run(
        &self,
        history: &ExecutionHistory,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO execution_history
             (id, scheduled_export_id, executed_at, status, message_count,
              file_path, file_size, error, duration_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                history.id,
                history.scheduled_export_id,
                history.executed_at.to_rfc3339(),
                history.status.to_string(),
                history.message_count.map(|v| v as i64),
                history.file_path,
                history.file_size.map(|v| v as i64),
                history.error,
                history.duration_ms as i64,
            ],
        )?;
        tx.execute(
            "DELETE FROM execution_history
             WHERE scheduled_export_id = ?1
               AND id NOT IN (
                 SELECT id FROM execution_history
                 WHERE scheduled_export_id = ?1
                 ORDER BY executed_at DESC
                 LIMIT ?2)",
            params![history.scheduled_export_id, HISTORY_LIMIT as i64],
        )?;
        tx.execute(
            "UPDATE scheduled_export
             SET last_run = ?2, next_run = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                history.scheduled_export_id,
                history.executed_at.to_rfc3339(),
                next_run.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_history(&self, scheduled_export_id: &str, limit: usize) -> Result<Vec<ExecutionHistory>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, scheduled_export_id, executed_at, status, message_count,
                    file_path, file_size, error, duration_ms
             FROM execution_history
             WHERE scheduled_export_id = ?1
             ORDER BY executed_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![scheduled_export_id, limit as i64], row_to_history)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn upsert_state(conn: &Connection, state: &TaskState) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO export_task_state
         (task_id, status, progress_pct, total_msgs, processed_msgs, success,
          failure, current_msg_id, start_time, end_time, error, speed_mps)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
         ON CONFLICT(task_id) DO UPDATE SET
           status = excluded.status,
           progress_pct = excluded.progress_pct,
           total_msgs = excluded.total_msgs,
           processed_msgs = excluded.processed_msgs,
           success = excluded.success,
           failure = excluded.failure,
           current_msg_id = excluded.current_msg_id,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           error = excluded.error,
           speed_mps = excluded.speed_mps",
        params![
            state.task_id,
            state.status.to_string(),
            state.progress as i64,
            state.total_messages as i64,
            state.processed_messages as i64,
            state.success_count as i64,
            state.failure_count as i64,
            state.current_message_id,
            state.start_time.map(|t| t.to_rfc3339()),
            state.end_time.map(|t| t.to_rfc3339()),
            state.error,
            state.speed_mps,
        ],
    )?;
    Ok(())
}

/// Owned parameter list for the scheduled-export insert/update statements
/// (?1..?17, in column order).
fn scheduled_values(s: &ScheduledExport) -> Vec<rusqlite::types::Value> {
    use rusqlite::types::Value;
    fn opt_text(v: Option<String>) -> Value {
        v.map(Value::Text).unwrap_or(Value::Null)
    }
    fn opt_int(v: Option<i64>) -> Value {
        v.map(Value::Integer).unwrap_or(Value::Null)
    }
    vec![
        Value::Text(s.id.clone()),
        Value::Text(s.name.clone()),
        Value::Text(s.chat.chat_type.to_string()),
        Value::Text(s.chat.peer_uid.clone()),
        Value::Text(s.schedule_type.to_string()),
        opt_text(s.cron_expression.clone()),
        Value::Text(s.execute_time.clone()),
        Value::Text(s.time_range_type.to_string()),
        opt_int(s.range_offset_start),
        opt_int(s.range_offset_end),
        Value::Text(s.format.to_string()),
        Value::Text(serde_json::to_string(&s.options).unwrap_or_else(|_| "{}".to_string())),
        Value::Integer(s.enabled as i64),
        opt_text(s.last_run.map(|t| t.to_rfc3339())),
        opt_text(s.next_run.map(|t| t.to_rfc3339())),
        Value::Text(s.created_at.to_rfc3339()),
        Value::Text(s.updated_at.to_rfc3339()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use qce_core::schedule::{ExecutionStatus, ScheduleType, TimeRangeType};
    use qce_core::task::{ExportFormat, MessageFilter};
    use qce_core::{ChatRef, TimeWindow};
    use uuid::Uuid;

    fn sample_task(name: &str) -> (ExportTask, TaskState) {
        let id = ExportTask::generate_id();
        let now = Utc::now();
        let task = ExportTask {
            task_id: id.clone(),
            chat: ChatRef::group("group-1"),
            chat_name: name.to_string(),
            formats: vec![ExportFormat::Json, ExportFormat::Html],
            filter: MessageFilter {
                window: TimeWindow::new(1_700_000_000_000, 1_700_086_400_000).unwrap(),
                include_recalled: true,
                senders: Some(vec!["u1".into()]),
                types: None,
                keyword: Some("hello".into()),
            },
            batch_size: 100,
            timeout_ms: 30_000,
            retry_count: 3,
            include_resource_links: true,
            output_dir: "/tmp/exports".into(),
            created_at: now,
            updated_at: now,
        };
        let state = TaskState::new(id);
        (task, state)
    }

    fn sample_schedule() -> ScheduledExport {
        let now = Utc::now();
        ScheduledExport {
            id: Uuid::now_v7().to_string(),
            name: "nightly".into(),
            chat: ChatRef::group("group-1"),
            schedule_type: ScheduleType::Daily,
            execute_time: "03:00".into(),
            cron_expression: None,
            time_range_type: TimeRangeType::Yesterday,
            range_offset_start: None,
            range_offset_end: None,
            format: ExportFormat::Json,
            options: serde_json::json!({}),
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn task_round_trip() {
        let store = TaskStore::open_in_memory().unwrap();
        let (task, state) = sample_task("测试群/聊");
        store.upsert_task(&task, &state).unwrap();

        let (loaded, loaded_state) = store.get_task(&task.task_id).unwrap().unwrap();
        assert_eq!(loaded.chat, task.chat);
        assert_eq!(loaded.formats, task.formats);
        assert_eq!(loaded.filter.window, task.filter.window);
        assert_eq!(loaded.filter.keyword.as_deref(), Some("hello"));
        assert_eq!(loaded_state.status, TaskStatus::Pending);
    }

    #[test]
    fn list_orders_newest_first() {
        let store = TaskStore::open_in_memory().unwrap();
        let (mut t1, s1) = sample_task("one");
        t1.created_at = Utc::now() - Duration::hours(2);
        let (t2, s2) = sample_task("two");
        store.upsert_task(&t1, &s1).unwrap();
        store.upsert_task(&t2, &s2).unwrap();

        let tasks = store.list_tasks().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].0.chat_name, "two");
    }

    #[test]
    fn status_filter_and_orphan_recovery() {
        let store = TaskStore::open_in_memory().unwrap();
        let (task, mut state) = sample_task("running one");
        state.status = TaskStatus::Running;
        store.upsert_task(&task, &state).unwrap();

        assert_eq!(store.tasks_by_status(TaskStatus::Running).unwrap().len(), 1);

        let n = store.mark_orphaned_running().unwrap();
        assert_eq!(n, 1);
        let (_, st) = store.get_task(&task.task_id).unwrap().unwrap();
        assert_eq!(st.status, TaskStatus::Failed);
        assert_eq!(st.error.as_deref(), Some("orphaned"));
    }

    #[test]
    fn delete_task_cascades_state() {
        let store = TaskStore::open_in_memory().unwrap();
        let (task, state) = sample_task("bye");
        store.upsert_task(&task, &state).unwrap();
        store.delete_task(&task.task_id).unwrap();
        assert!(store.get_task(&task.task_id).unwrap().is_none());
        assert!(store.delete_task(&task.task_id).is_err());
    }

    #[test]
    fn resource_upsert_and_expiry() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut res = qce_core::resource::ResourceInfo::new(
            qce_core::resource::ResourceType::Image,
            "a.png",
        );
        res.md5 = "d41d8cd98f00b204e9800998ecf8427e".into();
        res.checked_at = Some(Utc::now() - Duration::days(45));
        store.upsert_resource(&res).unwrap();

        // Update path flows through the same upsert.
        res.local_path = Some("/x/a.png".into());
        store.upsert_resource(&res).unwrap();
        let loaded = store.get_resource(&res.md5).unwrap().unwrap();
        assert_eq!(loaded.local_path.as_deref(), Some("/x/a.png"));

        let removed = store.delete_expired_resources(30).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_resource(&res.md5).unwrap().is_none());
    }

    #[test]
    fn md5_less_resources_are_not_persisted() {
        let store = TaskStore::open_in_memory().unwrap();
        let res = qce_core::resource::ResourceInfo::new(
            qce_core::resource::ResourceType::File,
            "doc.pdf",
        );
        store.upsert_resource(&res).unwrap();
        assert!(store.list_resources(None).unwrap().is_empty());
    }

    #[test]
    fn scheduled_crud_round_trip() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut sched = sample_schedule();
        store.create_scheduled(&sched).unwrap();

        sched.name = "weekly instead".into();
        sched.enabled = false;
        store.update_scheduled(&sched).unwrap();

        let loaded = store.get_scheduled(&sched.id).unwrap().unwrap();
        assert_eq!(loaded.name, "weekly instead");
        assert!(!loaded.enabled);
        assert!(store.list_scheduled(true).unwrap().is_empty());
        assert_eq!(store.list_scheduled(false).unwrap().len(), 1);

        store.delete_scheduled(&sched.id).unwrap();
        assert!(store.get_scheduled(&sched.id).unwrap().is_none());
    }

    #[test]
    fn history_pruned_to_limit_and_last_run_atomic() {
        let store = TaskStore::open_in_memory().unwrap();
        let sched = sample_schedule();
        store.create_scheduled(&sched).unwrap();

        let base = Utc::now() - Duration::days(1);
        for i in 0..105 {
            let history = ExecutionHistory {
                id: Uuid::now_v7().to_string(),
                scheduled_export_id: sched.id.clone(),
                executed_at: base + Duration::minutes(i),
                status: ExecutionStatus::Success,
                message_count: Some(10),
                file_path: None,
                file_size: None,
                error: None,
                duration_ms: 1_000,
            };
            store
                .complete_run(&history, Some(base + Duration::minutes(i + 60)))
                .unwrap();
        }

        let rows = store.list_history(&sched.id, 200).unwrap();
        assert_eq!(rows.len(), 100);
        // Newest kept, oldest pruned.
        assert_eq!(rows[0].executed_at, base + Duration::minutes(104));

        let loaded = store.get_scheduled(&sched.id).unwrap().unwrap();
        assert_eq!(loaded.last_run.unwrap(), base + Duration::minutes(104));
        assert!(loaded.next_run.is_some());
    }
}
