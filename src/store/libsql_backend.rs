//! libsql backend — async `Store` implementation.
//!
//! Supports a local file database and `:memory:` for tests. One connection
//! is reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::model::{
    ChatRef, CleanerOptions, Filter, GlobalStats, LineRemoval, PowerTime, ReplacementRule, Task,
    TaskUpdate, User, UserStats, WatermarkPosition, WatermarkSpec,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libsql store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libsql database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("enable foreign keys: {e}")))?;
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn last_insert_id(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT last_insert_rowid()", ())
            .await
            .map_err(q)?;
        match rows.next().await.map_err(q)? {
            Some(row) => row.get::<i64>(0).map_err(q),
            None => Err(DatabaseError::Query("last_insert_rowid returned nothing".into())),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn q(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn json_or_default<T: serde::de::DeserializeOwned + Default>(raw: Option<String>, what: &str) -> T {
    match raw {
        Some(s) if !s.is_empty() => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(column = what, "Ignoring unparsable stored JSON: {e}");
            T::default()
        }),
        _ => T::default(),
    }
}

/// Map a row to a Task.
///
/// Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let id: i64 = row.get(0)?;
    let owner_id: i64 = row.get(1)?;
    let source_key: String = row.get(2)?;
    let source_title: Option<String> = row.get(3).ok();
    let destination_key: String = row.get(4)?;
    let destination_title: Option<String> = row.get(5).ok();
    let enabled: i64 = row.get(6)?;
    let forward_delay: Option<i64> = row.get::<i64>(7).ok();
    let header: Option<String> = row.get(8).ok();
    let footer: Option<String> = row.get(9).ok();
    let translate_to: Option<String> = row.get(10).ok();
    let watermark_text: Option<String> = row.get(11).ok();
    let watermark_position: String = row.get(12)?;
    let power_on: Option<String> = row.get(13).ok();
    let power_off: Option<String> = row.get(14).ok();
    let remove_duplicates: i64 = row.get(15)?;
    let convert_buttons: i64 = row.get(16)?;
    let cleaner_raw: Option<String> = row.get(17).ok();
    let replacements_raw: Option<String> = row.get(18).ok();
    let remove_lines_raw: Option<String> = row.get(19).ok();
    let created_at: String = row.get(20)?;

    let watermark = watermark_text.filter(|t| !t.is_empty() && t != "none").map(|text| {
        WatermarkSpec {
            text,
            position: WatermarkPosition::parse(&watermark_position)
                .unwrap_or(WatermarkPosition::BottomRight),
        }
    });

    let cleaner = match cleaner_raw {
        Some(s) if !s.is_empty() => {
            serde_json::from_str::<CleanerOptions>(&s).unwrap_or_default()
        }
        _ => CleanerOptions::default(),
    };

    Ok(Task {
        id,
        owner_id,
        source: ChatRef::parse(&source_key),
        source_title,
        destination: ChatRef::parse(&destination_key),
        destination_title,
        enabled: enabled != 0,
        forward_delay: forward_delay.map(|d| d as u32),
        header,
        footer,
        translate_to,
        watermark,
        power_on: power_on.and_then(|s| PowerTime::parse(&s).ok()),
        power_off: power_off.and_then(|s| PowerTime::parse(&s).ok()),
        remove_duplicates: remove_duplicates != 0,
        convert_buttons: convert_buttons != 0,
        cleaner,
        replacements: json_or_default::<Vec<ReplacementRule>>(replacements_raw, "replacements"),
        remove_lines: json_or_default::<LineRemoval>(remove_lines_raw, "remove_lines"),
        created_at: parse_datetime(&created_at),
    })
}

const TASK_COLUMNS: &str = "task_id, owner_id, source_key, source_title, destination_key, \
     destination_title, is_enabled, forward_delay, header_text, footer_text, translate_to, \
     watermark_text, watermark_position, power_on_time, power_off_time, remove_duplicates, \
     convert_buttons, cleaner_options, replacements, remove_lines, created_at";

#[async_trait]
impl Store for LibSqlStore {
    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(
        &self,
        owner_id: i64,
        source: &ChatRef,
        source_title: Option<&str>,
        destination: &ChatRef,
        destination_title: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO forward_tasks
                    (owner_id, source_key, source_title, destination_key, destination_title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    owner_id,
                    source.storage_key(),
                    opt_text(source_title),
                    destination.storage_key(),
                    opt_text(destination_title),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(q)?;
        self.last_insert_id().await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM forward_tasks WHERE task_id = ?1"),
                params![task_id],
            )
            .await
            .map_err(q)?;

        match rows.next().await.map_err(q)? {
            Some(row) => Ok(Some(row_to_task(&row).map_err(q)?)),
            None => Ok(None),
        }
    }

    async fn get_user_tasks(&self, user_id: i64) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM forward_tasks
                     WHERE owner_id = ?1 ORDER BY created_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(q)?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(q)? {
            tasks.push(row_to_task(&row).map_err(q)?);
        }
        Ok(tasks)
    }

    async fn get_all_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM forward_tasks ORDER BY task_id"),
                (),
            )
            .await
            .map_err(q)?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(q)? {
            tasks.push(row_to_task(&row).map_err(q)?);
        }
        Ok(tasks)
    }

    async fn get_tasks_by_source(
        &self,
        chat_id: i64,
        handle: Option<&str>,
    ) -> Result<Vec<Task>, DatabaseError> {
        let handle_key = handle
            .map(|h| format!("@{}", h.trim_start_matches('@')))
            .unwrap_or_default();

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM forward_tasks
                     WHERE is_enabled = 1 AND (source_key = ?1 OR source_key = ?2)"
                ),
                params![chat_id.to_string(), handle_key],
            )
            .await
            .map_err(q)?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await.map_err(q)? {
            tasks.push(row_to_task(&row).map_err(q)?);
        }
        Ok(tasks)
    }

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<(), DatabaseError> {
        // Each present field becomes one SET clause; absent fields are untouched.
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        let mut push = |clause: &str, value: libsql::Value| {
            values.push(value);
            sets.push(format!("{clause} = ?{}", values.len()));
        };

        if let Some(enabled) = update.enabled {
            push("is_enabled", libsql::Value::Integer(enabled as i64));
        }
        if let Some(ref delay) = update.forward_delay {
            match delay {
                Some(d) => push("forward_delay", libsql::Value::Integer(*d as i64)),
                None => push("forward_delay", libsql::Value::Null),
            }
        }
        if let Some(ref header) = update.header {
            push("header_text", opt_text(header.as_deref()));
        }
        if let Some(ref footer) = update.footer {
            push("footer_text", opt_text(footer.as_deref()));
        }
        if let Some(ref lang) = update.translate_to {
            push("translate_to", opt_text(lang.as_deref()));
        }
        if let Some(ref watermark) = update.watermark {
            match watermark {
                Some(spec) => {
                    push("watermark_text", libsql::Value::Text(spec.text.clone()));
                    push(
                        "watermark_position",
                        libsql::Value::Text(spec.position.as_str().to_string()),
                    );
                }
                None => push("watermark_text", libsql::Value::Null),
            }
        }
        if let Some(ref t) = update.power_on {
            push("power_on_time", opt_text(t.map(|v| v.to_string()).as_deref()));
        }
        if let Some(ref t) = update.power_off {
            push("power_off_time", opt_text(t.map(|v| v.to_string()).as_deref()));
        }
        if let Some(flag) = update.remove_duplicates {
            push("remove_duplicates", libsql::Value::Integer(flag as i64));
        }
        if let Some(flag) = update.convert_buttons {
            push("convert_buttons", libsql::Value::Integer(flag as i64));
        }
        if let Some(ref cleaner) = update.cleaner {
            push("cleaner_options", libsql::Value::Text(to_json(cleaner)?));
        }
        if let Some(ref replacements) = update.replacements {
            push("replacements", libsql::Value::Text(to_json(replacements)?));
        }
        if let Some(ref remove_lines) = update.remove_lines {
            push("remove_lines", libsql::Value::Text(to_json(remove_lines)?));
        }

        if sets.is_empty() {
            return Ok(());
        }

        values.push(libsql::Value::Integer(task_id));
        let sql = format!(
            "UPDATE forward_tasks SET {} WHERE task_id = ?{}",
            sets.join(", "),
            values.len()
        );
        self.conn().execute(&sql, values).await.map_err(q)?;
        Ok(())
    }

    async fn delete_task(&self, task_id: i64) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM forward_tasks WHERE task_id = ?1",
                params![task_id],
            )
            .await
            .map_err(q)?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".into(),
                id: task_id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_task_enabled(&self, task_id: i64, enabled: bool) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE forward_tasks SET is_enabled = ?1 WHERE task_id = ?2",
                params![enabled as i64, task_id],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    // ── Filters ─────────────────────────────────────────────────────

    async fn add_filter(
        &self,
        task_id: i64,
        filter_type: &str,
        value: &str,
        whitelist: bool,
    ) -> Result<i64, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO filters (task_id, filter_type, filter_value, is_whitelist)
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_id, filter_type, value, whitelist as i64],
            )
            .await
            .map_err(q)?;
        self.last_insert_id().await
    }

    async fn get_task_filters(&self, task_id: i64) -> Result<Vec<Filter>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT filter_id, filter_type, filter_value, is_whitelist
                 FROM filters WHERE task_id = ?1 ORDER BY filter_id",
                params![task_id],
            )
            .await
            .map_err(q)?;

        let mut filters = Vec::new();
        while let Some(row) = rows.next().await.map_err(q)? {
            let id: i64 = row.get(0).map_err(q)?;
            let filter_type: String = row.get(1).map_err(q)?;
            let value: String = row.get(2).map_err(q)?;
            let whitelist: i64 = row.get(3).map_err(q)?;

            match Filter::parse(id, task_id, &filter_type, &value, whitelist != 0) {
                Some(filter) => filters.push(filter),
                None => {
                    warn!(
                        filter_id = id,
                        task_id,
                        filter_type = %filter_type,
                        "Skipping malformed filter value"
                    );
                }
            }
        }
        Ok(filters)
    }

    async fn delete_filter(&self, filter_id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM filters WHERE filter_id = ?1",
                params![filter_id],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    // ── Duplicate detection ─────────────────────────────────────────

    async fn is_duplicate(&self, task_id: i64, hash: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM forwarded_messages WHERE task_id = ?1 AND message_hash = ?2",
                params![task_id, hash],
            )
            .await
            .map_err(q)?;
        Ok(rows.next().await.map_err(q)?.is_some())
    }

    async fn record_fingerprint(
        &self,
        task_id: i64,
        message_id: i64,
        source_chat_id: i64,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        // INSERT OR IGNORE against the unique (task_id, message_hash) index
        // makes record-if-absent atomic; a lost race reports 0 rows changed.
        let changed = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO forwarded_messages
                    (task_id, original_message_id, source_chat_id, message_hash, forwarded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    task_id,
                    message_id,
                    source_chat_id,
                    hash,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(q)?;
        Ok(changed == 1)
    }

    async fn remove_fingerprint(&self, task_id: i64, hash: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM forwarded_messages WHERE task_id = ?1 AND message_hash = ?2",
                params![task_id, hash],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    // ── Statistics ──────────────────────────────────────────────────

    async fn increment_stat(&self, user_id: i64, task_id: i64) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO statistics (user_id, task_id, messages_forwarded, last_forward_at)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(user_id, task_id) DO UPDATE SET
                     messages_forwarded = messages_forwarded + 1,
                     last_forward_at = ?3",
                params![user_id, task_id, now],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    async fn get_user_stats(&self, user_id: i64) -> Result<UserStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(SUM(messages_forwarded), 0) FROM statistics WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(q)?;

        let total_forwarded = match rows.next().await.map_err(q)? {
            Some(row) => row.get::<i64>(0).map_err(q)?,
            None => 0,
        };
        Ok(UserStats { total_forwarded })
    }

    async fn get_global_stats(&self) -> Result<GlobalStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(DISTINCT user_id), COUNT(DISTINCT task_id),
                        COALESCE(SUM(messages_forwarded), 0)
                 FROM statistics",
                (),
            )
            .await
            .map_err(q)?;

        match rows.next().await.map_err(q)? {
            Some(row) => Ok(GlobalStats {
                total_users: row.get::<i64>(0).map_err(q)?,
                total_tasks: row.get::<i64>(1).map_err(q)?,
                total_forwarded: row.get::<i64>(2).map_err(q)?,
            }),
            None => Ok(GlobalStats::default()),
        }
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn add_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.user_id,
                    opt_text(user.username.as_deref()),
                    opt_text(user.first_name.as_deref()),
                    opt_text(user.last_name.as_deref()),
                    user.joined_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    async fn ban_user(&self, user_id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET is_banned = 1 WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(q)?;
        Ok(())
    }

    async fn get_broadcast_users(&self) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT user_id FROM users WHERE is_banned = 0", ())
            .await
            .map_err(q)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(q)? {
            ids.push(row.get::<i64>(0).map_err(q)?);
        }
        Ok(ids)
    }
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CryptoMode;
    use crate::model::FilterKind;

    async fn store() -> LibSqlStore {
        LibSqlStore::new_memory().await.unwrap()
    }

    async fn make_task(store: &LibSqlStore) -> i64 {
        store
            .create_task(
                7,
                &ChatRef::Id(-100123),
                Some("Source"),
                &ChatRef::Id(-100456),
                Some("Dest"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_get_task() {
        let store = store().await;
        let id = make_task(&store).await;

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.owner_id, 7);
        assert_eq!(task.source, ChatRef::Id(-100123));
        assert!(task.enabled);
        assert!(task.remove_duplicates);
        assert!(!task.convert_buttons);
        assert_eq!(task.forward_delay, None);
    }

    #[tokio::test]
    async fn get_tasks_by_source_matches_id_and_handle() {
        let store = store().await;
        store
            .create_task(1, &ChatRef::Id(-10), None, &ChatRef::Id(-20), None)
            .await
            .unwrap();
        store
            .create_task(1, &ChatRef::Handle("news".into()), None, &ChatRef::Id(-20), None)
            .await
            .unwrap();

        let by_id = store.get_tasks_by_source(-10, None).await.unwrap();
        assert_eq!(by_id.len(), 1);

        let by_handle = store.get_tasks_by_source(-99, Some("news")).await.unwrap();
        assert_eq!(by_handle.len(), 1);
        assert_eq!(by_handle[0].source, ChatRef::Handle("news".into()));

        let none = store.get_tasks_by_source(-99, None).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn disabled_tasks_not_matched_by_source() {
        let store = store().await;
        let id = make_task(&store).await;
        store.set_task_enabled(id, false).await.unwrap();
        let tasks = store.get_tasks_by_source(-100123, None).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn update_task_fields() {
        let store = store().await;
        let id = make_task(&store).await;

        let update = TaskUpdate {
            forward_delay: Some(Some(5)),
            header: Some(Some("HEAD".into())),
            translate_to: Some(Some("de".into())),
            watermark: Some(Some(WatermarkSpec {
                text: "@relay".into(),
                position: WatermarkPosition::Center,
            })),
            power_on: Some(Some(PowerTime::parse("08:00").unwrap())),
            convert_buttons: Some(true),
            replacements: Some(vec![ReplacementRule {
                old: "a".into(),
                new: "b".into(),
                case_sensitive: false,
            }]),
            ..Default::default()
        };
        store.update_task(id, &update).await.unwrap();

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.forward_delay, Some(5));
        assert_eq!(task.header.as_deref(), Some("HEAD"));
        assert_eq!(task.translate_to.as_deref(), Some("de"));
        assert_eq!(
            task.watermark,
            Some(WatermarkSpec {
                text: "@relay".into(),
                position: WatermarkPosition::Center
            })
        );
        assert_eq!(task.power_on, Some(PowerTime { hour: 8, minute: 0 }));
        assert!(task.convert_buttons);
        assert_eq!(task.replacements.len(), 1);

        // Clearing an optional field
        let clear = TaskUpdate {
            forward_delay: Some(None),
            watermark: Some(None),
            ..Default::default()
        };
        store.update_task(id, &clear).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.forward_delay, None);
        assert_eq!(task.watermark, None);
    }

    #[tokio::test]
    async fn delete_task_cascades() {
        let store = store().await;
        let id = make_task(&store).await;
        store.add_filter(id, "keyword", "sale", false).await.unwrap();
        store.record_fingerprint(id, 1, -100123, "abc").await.unwrap();
        store.increment_stat(7, id).await.unwrap();

        store.delete_task(id).await.unwrap();
        assert!(store.get_task(id).await.unwrap().is_none());
        assert!(store.get_task_filters(id).await.unwrap().is_empty());
        assert!(!store.is_duplicate(id, "abc").await.unwrap());

        assert!(matches!(
            store.delete_task(id).await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn filters_roundtrip_and_malformed_skip() {
        let store = store().await;
        let id = make_task(&store).await;

        store.add_filter(id, "user", "1, 2, 3", true).await.unwrap();
        store.add_filter(id, "regex", "([bad", false).await.unwrap();
        store.add_filter(id, "crypto", "no_crypto", false).await.unwrap();

        let filters = store.get_task_filters(id).await.unwrap();
        // The malformed regex row is skipped, not fatal.
        assert_eq!(filters.len(), 2);
        assert!(matches!(filters[0].kind, FilterKind::User(ref ids) if ids == &[1, 2, 3]));
        assert!(matches!(filters[1].kind, FilterKind::Crypto(CryptoMode::Exclude)));

        store.delete_filter(filters[0].id).await.unwrap();
        assert_eq!(store.get_task_filters(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fingerprint_record_is_atomic() {
        let store = store().await;
        let id = make_task(&store).await;

        assert!(!store.is_duplicate(id, "h1").await.unwrap());
        assert!(store.record_fingerprint(id, 10, -1, "h1").await.unwrap());
        assert!(store.is_duplicate(id, "h1").await.unwrap());

        // Second record of the same (task, hash) loses the race.
        assert!(!store.record_fingerprint(id, 11, -1, "h1").await.unwrap());

        // Other tasks are unaffected.
        let other = make_task(&store).await;
        assert!(!store.is_duplicate(other, "h1").await.unwrap());
    }

    #[tokio::test]
    async fn removed_fingerprint_can_be_reclaimed() {
        let store = store().await;
        let id = make_task(&store).await;

        assert!(store.record_fingerprint(id, 10, -1, "h2").await.unwrap());
        store.remove_fingerprint(id, "h2").await.unwrap();
        assert!(!store.is_duplicate(id, "h2").await.unwrap());
        assert!(store.record_fingerprint(id, 11, -1, "h2").await.unwrap());
    }

    #[tokio::test]
    async fn stats_upsert() {
        let store = store().await;
        let id = make_task(&store).await;

        store.increment_stat(7, id).await.unwrap();
        store.increment_stat(7, id).await.unwrap();
        store.increment_stat(7, id).await.unwrap();

        assert_eq!(store.get_user_stats(7).await.unwrap().total_forwarded, 3);
        let global = store.get_global_stats().await.unwrap();
        assert_eq!(global.total_users, 1);
        assert_eq!(global.total_tasks, 1);
        assert_eq!(global.total_forwarded, 3);
    }

    #[tokio::test]
    async fn users_and_broadcast_list() {
        let store = store().await;
        let user = User {
            user_id: 1,
            username: Some("alice".into()),
            first_name: Some("Alice".into()),
            last_name: None,
            joined_at: Utc::now(),
            banned: false,
        };
        store.add_user(&user).await.unwrap();
        // Insert-or-ignore: re-adding is a no-op.
        store.add_user(&user).await.unwrap();
        store
            .add_user(&User {
                user_id: 2,
                username: None,
                first_name: None,
                last_name: None,
                joined_at: Utc::now(),
                banned: false,
            })
            .await
            .unwrap();

        store.ban_user(2).await.unwrap();
        assert_eq!(store.get_broadcast_users().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn local_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");

        let id = {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            make_task(&store).await
        };

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.source, ChatRef::Id(-100123));
        assert_eq!(store.get_all_tasks().await.unwrap().len(), 1);
    }
}
