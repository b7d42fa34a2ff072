//! Version-tracked database migrations for the libsql backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            joined_at TEXT NOT NULL,
            is_banned INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS forward_tasks (
            task_id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            source_key TEXT NOT NULL,
            source_title TEXT,
            destination_key TEXT NOT NULL,
            destination_title TEXT,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            forward_delay INTEGER,
            header_text TEXT,
            footer_text TEXT,
            translate_to TEXT,
            watermark_text TEXT,
            watermark_position TEXT NOT NULL DEFAULT 'bottom-right',
            power_on_time TEXT,
            power_off_time TEXT,
            remove_duplicates INTEGER NOT NULL DEFAULT 1,
            convert_buttons INTEGER NOT NULL DEFAULT 0,
            cleaner_options TEXT,
            replacements TEXT,
            remove_lines TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_owner ON forward_tasks(owner_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_source ON forward_tasks(source_key, is_enabled);

        CREATE TABLE IF NOT EXISTS filters (
            filter_id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES forward_tasks(task_id) ON DELETE CASCADE,
            filter_type TEXT NOT NULL,
            filter_value TEXT NOT NULL,
            is_whitelist INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_filters_task ON filters(task_id);

        CREATE TABLE IF NOT EXISTS forwarded_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES forward_tasks(task_id) ON DELETE CASCADE,
            original_message_id INTEGER NOT NULL,
            source_chat_id INTEGER NOT NULL,
            message_hash TEXT NOT NULL,
            forwarded_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_forwarded_task_hash
            ON forwarded_messages(task_id, message_hash);

        CREATE TABLE IF NOT EXISTS statistics (
            stat_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            task_id INTEGER NOT NULL REFERENCES forward_tasks(task_id) ON DELETE CASCADE,
            messages_forwarded INTEGER NOT NULL DEFAULT 0,
            last_forward_at TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_stats_user_task
            ON statistics(user_id, task_id);
    "#,
}];

/// Run all pending migrations against the connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| DatabaseError::Migration(format!("{}: {e}", migration.name)))?;

        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("record {}: {e}", migration.name)))?;

        tracing::info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(e.to_string())),
        None => Ok(0),
    }
}
