//! `Store` trait — the persistence contract consumed by the pipeline,
//! the scheduler, and the configuration surface.
//!
//! Only the contract matters here; the storage format lives behind the
//! libsql backend and its migrations.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{ChatRef, Filter, GlobalStats, Task, TaskUpdate, User, UserStats};

/// Backend-agnostic store covering tasks, filters, dedup fingerprints,
/// statistics, and the user registry.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Tasks ───────────────────────────────────────────────────────

    /// Create a task. Returns the new task id.
    async fn create_task(
        &self,
        owner_id: i64,
        source: &ChatRef,
        source_title: Option<&str>,
        destination: &ChatRef,
        destination_title: Option<&str>,
    ) -> Result<i64, DatabaseError>;

    /// Get a task by id.
    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, DatabaseError>;

    /// All tasks owned by a user, newest first.
    async fn get_user_tasks(&self, user_id: i64) -> Result<Vec<Task>, DatabaseError>;

    /// Every stored task, used to seed the power scheduler at startup.
    async fn get_all_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    /// Enabled tasks whose source matches the given chat, resolved by
    /// numeric id or by `@handle` — a source stored as a handle must match
    /// an incoming chat that only later resolved to an id, and vice versa.
    async fn get_tasks_by_source(
        &self,
        chat_id: i64,
        handle: Option<&str>,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Apply a partial update. Validation happens before this is called.
    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<(), DatabaseError>;

    /// Delete a task; cascades to its filters, fingerprints, and stats.
    async fn delete_task(&self, task_id: i64) -> Result<(), DatabaseError>;

    /// Set the enabled flag. Both user commands and the power scheduler
    /// write through this path.
    async fn set_task_enabled(&self, task_id: i64, enabled: bool) -> Result<(), DatabaseError>;

    // ── Filters ─────────────────────────────────────────────────────

    /// Add a filter row. The raw value is stored as given; callers
    /// validate with `Filter::parse` first.
    async fn add_filter(
        &self,
        task_id: i64,
        filter_type: &str,
        value: &str,
        whitelist: bool,
    ) -> Result<i64, DatabaseError>;

    /// Load a task's filters. Malformed rows are skipped with a
    /// diagnostic, never returned as errors.
    async fn get_task_filters(&self, task_id: i64) -> Result<Vec<Filter>, DatabaseError>;

    /// Delete a single filter.
    async fn delete_filter(&self, filter_id: i64) -> Result<(), DatabaseError>;

    // ── Duplicate detection ─────────────────────────────────────────

    /// Has this content hash already been forwarded through this task?
    async fn is_duplicate(&self, task_id: i64, hash: &str) -> Result<bool, DatabaseError>;

    /// Claim a fingerprint ahead of delivery. Returns `false` when the
    /// `(task, hash)` pair was already present — the atomic
    /// insert-if-absent that closes the concurrent-delivery race.
    async fn record_fingerprint(
        &self,
        task_id: i64,
        message_id: i64,
        source_chat_id: i64,
        hash: &str,
    ) -> Result<bool, DatabaseError>;

    /// Release a claimed fingerprint when delivery fails, so the same
    /// content can be forwarded again later.
    async fn remove_fingerprint(&self, task_id: i64, hash: &str) -> Result<(), DatabaseError>;

    // ── Statistics ──────────────────────────────────────────────────

    /// Increment the forwarded counter for `(user, task)`.
    async fn increment_stat(&self, user_id: i64, task_id: i64) -> Result<(), DatabaseError>;

    async fn get_user_stats(&self, user_id: i64) -> Result<UserStats, DatabaseError>;

    async fn get_global_stats(&self) -> Result<GlobalStats, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Register a user (insert-or-ignore).
    async fn add_user(&self, user: &User) -> Result<(), DatabaseError>;

    async fn ban_user(&self, user_id: i64) -> Result<(), DatabaseError>;

    /// Ids of all non-banned users, for broadcast.
    async fn get_broadcast_users(&self) -> Result<Vec<i64>, DatabaseError>;
}
