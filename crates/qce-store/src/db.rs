use rusqlite::Connection;

use crate::error::Result;

/// Initialise the task-store schema.
///
/// Safe to call on every startup — `IF NOT EXISTS` throughout. All times are
/// ISO-8601 TEXT except the export window, which stays in epoch millis so
/// range comparisons need no parsing.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS export_task (
            task_id          TEXT    NOT NULL PRIMARY KEY,
            chat_type        TEXT    NOT NULL,
            peer_uid         TEXT    NOT NULL,
            chat_name        TEXT    NOT NULL,
            formats_csv      TEXT    NOT NULL,
            window_start_ms  INTEGER NOT NULL DEFAULT 0,
            window_end_ms    INTEGER NOT NULL DEFAULT 0,
            include_recalled INTEGER NOT NULL DEFAULT 0,
            filter_json      TEXT    NOT NULL DEFAULT '{}',
            batch_size       INTEGER NOT NULL,
            timeout_ms       INTEGER NOT NULL,
            retry_count      INTEGER NOT NULL,
            include_links    INTEGER NOT NULL DEFAULT 1,
            output_dir       TEXT    NOT NULL,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_export_task_created
            ON export_task (created_at DESC);

        CREATE TABLE IF NOT EXISTS export_task_state (
            task_id        TEXT    NOT NULL PRIMARY KEY
                           REFERENCES export_task(task_id) ON DELETE CASCADE,
            status         TEXT    NOT NULL DEFAULT 'pending',
            progress_pct   INTEGER NOT NULL DEFAULT 0,
            total_msgs     INTEGER NOT NULL DEFAULT 0,
            processed_msgs INTEGER NOT NULL DEFAULT 0,
            success        INTEGER NOT NULL DEFAULT 0,
            failure        INTEGER NOT NULL DEFAULT 0,
            current_msg_id TEXT,
            start_time     TEXT,
            end_time       TEXT,
            error          TEXT,
            speed_mps      REAL    NOT NULL DEFAULT 0.0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_task_state_status
            ON export_task_state (status);

        CREATE TABLE IF NOT EXISTS resource (
            md5               TEXT    NOT NULL PRIMARY KEY,
            type              TEXT    NOT NULL,
            file_name         TEXT    NOT NULL,
            file_size         INTEGER NOT NULL DEFAULT 0,
            mime              TEXT    NOT NULL DEFAULT '',
            original_url      TEXT,
            local_path        TEXT,
            status            TEXT    NOT NULL DEFAULT 'pending',
            accessible        INTEGER NOT NULL DEFAULT 0,
            checked_at        TEXT,
            download_attempts INTEGER NOT NULL DEFAULT 0,
            last_error        TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_resource_checked
            ON resource (checked_at);

        CREATE TABLE IF NOT EXISTS scheduled_export (
            id                 TEXT    NOT NULL PRIMARY KEY,
            name               TEXT    NOT NULL,
            chat_type          TEXT    NOT NULL,
            peer_uid           TEXT    NOT NULL,
            schedule_type      TEXT    NOT NULL,
            cron_expr          TEXT,
            execute_time       TEXT    NOT NULL DEFAULT '00:00',
            time_range_type    TEXT    NOT NULL,
            range_offset_start INTEGER,
            range_offset_end   INTEGER,
            format             TEXT    NOT NULL,
            options_json       TEXT    NOT NULL DEFAULT '{}',
            enabled            INTEGER NOT NULL DEFAULT 1,
            last_run           TEXT,
            next_run           TEXT,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS execution_history (
            id                  TEXT    NOT NULL PRIMARY KEY,
            scheduled_export_id TEXT    NOT NULL
                                REFERENCES scheduled_export(id) ON DELETE CASCADE,
            executed_at         TEXT    NOT NULL,
            status              TEXT    NOT NULL,
            message_count       INTEGER,
            file_path           TEXT,
            file_size           INTEGER,
            error               TEXT,
            duration_ms         INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_history_schedule
            ON execution_history (scheduled_export_id, executed_at DESC);
        ",
    )?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}
