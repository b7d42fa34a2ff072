//! Error types for relaybot.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Configuration-related errors.
///
/// Rejected synchronously, before anything touches the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Forward delay {0}s out of range (1..=3600)")]
    DelayOutOfRange(u32),

    #[error("Invalid time of day '{0}' (expected HH:MM)")]
    InvalidTimeOfDay(String),

    #[error("Unsupported language code: {0}")]
    UnsupportedLanguage(String),

    #[error("Unknown watermark position: {0}")]
    UnknownWatermarkPosition(String),

    #[error("Task {task_id} is not owned by user {user_id}")]
    NotTaskOwner { task_id: i64, user_id: i64 },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Chat-transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("API call {method} failed: {reason}")]
    ApiFailed { method: String, reason: String },

    #[error("API call {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Media download failed for {file_ref}: {reason}")]
    DownloadFailed { file_ref: String, reason: String },

    #[error("Chat not resolvable: {0}")]
    ChatNotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Forwarding-pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Delivery failed for task {task_id}, message {message_id}: {reason}")]
    DeliveryFailed {
        task_id: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Power-scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Invalid trigger time '{0}' (expected HH:MM)")]
    InvalidTime(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
