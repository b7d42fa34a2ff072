//! Shared types for the forwarding pipeline.

use serde::{Deserialize, Serialize};

/// Where in the pipeline a message was dropped.
///
/// Ordered to match the evaluation sequence; the stage is recorded for
/// observability — failing any stage skips the message either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    /// Task disabled (power window or manual).
    Gated,
    /// A user filter rejected the sender.
    UserFilter,
    /// A keyword filter rejected the text.
    KeywordFilter,
    /// A regex filter rejected the text.
    RegexFilter,
    /// The crypto filter rejected the text.
    CryptoFilter,
    /// Content already forwarded through this task.
    Duplicate,
    /// Another worker is already processing this (task, message).
    InFlight,
}

impl std::fmt::Display for SkipStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gated => "gated",
            Self::UserFilter => "user_filter",
            Self::KeywordFilter => "keyword_filter",
            Self::RegexFilter => "regex_filter",
            Self::CryptoFilter => "crypto_filter",
            Self::Duplicate => "duplicate",
            Self::InFlight => "in_flight",
        };
        write!(f, "{s}")
    }
}

/// Verdict from the filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Forward,
    Skip(SkipStage),
}

impl FilterVerdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// Terminal result of one message's run through the pipeline for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Delivered, fingerprint recorded, statistic incremented.
    Delivered,
    /// Dropped before delivery at the named stage.
    Skipped(SkipStage),
    /// Delivery was attempted and failed; nothing recorded or counted.
    Failed(String),
}
