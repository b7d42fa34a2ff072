//! Task and filter records.
//!
//! Tasks and filters are strongly typed and validated when they are built
//! or loaded, so the pipeline never branches on loosely-typed maps. A
//! filter whose stored value cannot be parsed is reported and dropped at
//! load time; it must never abort evaluation of the others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{self, FORWARD_DELAY_MAX, FORWARD_DELAY_MIN};
use crate::error::ConfigError;

// ── Chat references ─────────────────────────────────────────────────

/// A chat referenced either by numeric id or by `@handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRef {
    Id(i64),
    Handle(String),
}

impl ChatRef {
    /// Parse a stored or user-supplied reference. `-100…`-style numeric
    /// strings become ids; anything else is treated as a handle (with or
    /// without the leading `@`).
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            ChatRef::Id(id)
        } else {
            ChatRef::Handle(trimmed.trim_start_matches('@').to_string())
        }
    }

    /// Like `parse`, but rejects strings that are neither a numeric id
    /// nor a plausible handle (letters, digits, underscores).
    pub fn parse_strict(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Some(ChatRef::Id(id));
        }
        let handle = trimmed.trim_start_matches('@');
        if handle.len() >= 4 && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Some(ChatRef::Handle(handle.to_string()))
        } else {
            None
        }
    }

    /// Canonical storage form: the id as decimal, or `@handle`.
    pub fn storage_key(&self) -> String {
        match self {
            ChatRef::Id(id) => id.to_string(),
            ChatRef::Handle(h) => format!("@{h}"),
        }
    }
}

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

// ── Watermark ───────────────────────────────────────────────────────

/// Corner/center anchor for the watermark overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    Center,
}

impl WatermarkPosition {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "bottom-right" => Ok(Self::BottomRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "top-right" => Ok(Self::TopRight),
            "top-left" => Ok(Self::TopLeft),
            "center" => Ok(Self::Center),
            other => Err(ConfigError::UnknownWatermarkPosition(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BottomRight => "bottom-right",
            Self::BottomLeft => "bottom-left",
            Self::TopRight => "top-right",
            Self::TopLeft => "top-left",
            Self::Center => "center",
        }
    }
}

/// Watermark text + anchor, applied to photo/video content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub text: String,
    pub position: WatermarkPosition,
}

// ── Power schedule ──────────────────────────────────────────────────

/// A wall-clock HH:MM trigger time (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerTime {
    pub hour: u8,
    pub minute: u8,
}

impl PowerTime {
    /// Parse `HH:MM`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTimeOfDay(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }

}

impl std::fmt::Display for PowerTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// ── Transform configuration ─────────────────────────────────────────

/// Independent toggles for the cleaner stage. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerOptions {
    pub remove_usernames: bool,
    pub remove_urls: bool,
    pub remove_hashtags: bool,
    pub remove_markdown_links: bool,
}

impl Default for CleanerOptions {
    fn default() -> Self {
        Self {
            remove_usernames: true,
            remove_urls: true,
            remove_hashtags: true,
            remove_markdown_links: true,
        }
    }
}

/// A literal substring replacement rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementRule {
    pub old: String,
    #[serde(default)]
    pub new: String,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

fn default_true() -> bool {
    true
}

/// Line-removal configuration: by keyword and/or by 1-indexed line number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoval {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub line_numbers: Vec<usize>,
}

impl LineRemoval {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.line_numbers.is_empty()
    }
}

// ── Task ────────────────────────────────────────────────────────────

/// A configured forwarding relationship from one source chat to one
/// destination chat, owned by a user.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub owner_id: i64,
    pub source: ChatRef,
    pub source_title: Option<String>,
    pub destination: ChatRef,
    pub destination_title: Option<String>,
    pub enabled: bool,
    pub forward_delay: Option<u32>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub translate_to: Option<String>,
    pub watermark: Option<WatermarkSpec>,
    pub power_on: Option<PowerTime>,
    pub power_off: Option<PowerTime>,
    pub remove_duplicates: bool,
    pub convert_buttons: bool,
    pub cleaner: CleanerOptions,
    pub replacements: Vec<ReplacementRule>,
    pub remove_lines: LineRemoval,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Validate the mutable settings of a task. Called on every update
    /// path before anything reaches the store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(delay) = self.forward_delay
            && !(FORWARD_DELAY_MIN..=FORWARD_DELAY_MAX).contains(&delay)
        {
            return Err(ConfigError::DelayOutOfRange(delay));
        }
        if let Some(ref lang) = self.translate_to
            && !config::is_supported_language(lang)
        {
            return Err(ConfigError::UnsupportedLanguage(lang.clone()));
        }
        Ok(())
    }
}

/// Partial update applied to a task. `None` leaves a field untouched;
/// optional fields use a double `Option` so `Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub enabled: Option<bool>,
    pub forward_delay: Option<Option<u32>>,
    pub header: Option<Option<String>>,
    pub footer: Option<Option<String>>,
    pub translate_to: Option<Option<String>>,
    pub watermark: Option<Option<WatermarkSpec>>,
    pub power_on: Option<Option<PowerTime>>,
    pub power_off: Option<Option<PowerTime>>,
    pub remove_duplicates: Option<bool>,
    pub convert_buttons: Option<bool>,
    pub cleaner: Option<CleanerOptions>,
    pub replacements: Option<Vec<ReplacementRule>>,
    pub remove_lines: Option<LineRemoval>,
}

impl TaskUpdate {
    /// Validate the fields present in this update.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(Some(delay)) = self.forward_delay
            && !(FORWARD_DELAY_MIN..=FORWARD_DELAY_MAX).contains(&delay)
        {
            return Err(ConfigError::DelayOutOfRange(delay));
        }
        if let Some(Some(ref lang)) = self.translate_to
            && !config::is_supported_language(lang)
        {
            return Err(ConfigError::UnsupportedLanguage(lang.clone()));
        }
        Ok(())
    }
}

// ── Filters ─────────────────────────────────────────────────────────

/// Crypto filter mode: require crypto vocabulary, or forbid it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    /// `only_crypto` — message must contain a vocabulary term.
    Only,
    /// `no_crypto` — message must not contain any vocabulary term.
    Exclude,
}

/// A parsed filter rule. The raw string grammar depends on the kind:
/// comma-separated ids, comma-separated terms, a regex pattern, or
/// one of the two crypto tokens.
#[derive(Debug, Clone)]
pub enum FilterKind {
    User(Vec<i64>),
    Keyword(Vec<String>),
    Regex(regex::Regex),
    Crypto(CryptoMode),
}

/// A named rule with whitelist or blacklist polarity, scoped to a task.
#[derive(Debug, Clone)]
pub struct Filter {
    pub id: i64,
    pub task_id: i64,
    pub kind: FilterKind,
    pub whitelist: bool,
}

impl Filter {
    /// Parse the stored `(filter_type, filter_value)` pair into a typed
    /// filter. Returns `None` (with a diagnostic) for malformed values —
    /// a bad filter is skipped, never fatal.
    pub fn parse(id: i64, task_id: i64, filter_type: &str, value: &str, whitelist: bool) -> Option<Self> {
        let kind = match filter_type {
            "user" => {
                let ids: Vec<i64> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .ok()?;
                if ids.is_empty() {
                    return None;
                }
                FilterKind::User(ids)
            }
            "keyword" => {
                let terms: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if terms.is_empty() {
                    return None;
                }
                FilterKind::Keyword(terms)
            }
            // Regex filters match case-insensitively, like keyword filters.
            "regex" => FilterKind::Regex(
                regex::RegexBuilder::new(value)
                    .case_insensitive(true)
                    .build()
                    .ok()?,
            ),
            "crypto" => match value.to_lowercase().as_str() {
                "only_crypto" => FilterKind::Crypto(CryptoMode::Only),
                "no_crypto" => FilterKind::Crypto(CryptoMode::Exclude),
                _ => return None,
            },
            _ => return None,
        };

        Some(Self {
            id,
            task_id,
            kind,
            whitelist,
        })
    }
}

// ── Users ───────────────────────────────────────────────────────────

/// A registered bot user.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub banned: bool,
}

/// Per-user forwarding totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_forwarded: i64,
}

/// Bot-wide forwarding totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub total_users: i64,
    pub total_tasks: i64,
    pub total_forwarded: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_ref_parse_numeric() {
        assert_eq!(ChatRef::parse("-1001234"), ChatRef::Id(-1001234));
        assert_eq!(ChatRef::parse(" 42 "), ChatRef::Id(42));
    }

    #[test]
    fn chat_ref_parse_handle() {
        assert_eq!(ChatRef::parse("@news"), ChatRef::Handle("news".into()));
        assert_eq!(ChatRef::parse("news"), ChatRef::Handle("news".into()));
        assert_eq!(ChatRef::parse("@news").storage_key(), "@news");
    }

    #[test]
    fn chat_ref_parse_strict_rejects_junk() {
        assert_eq!(ChatRef::parse_strict("-55"), Some(ChatRef::Id(-55)));
        assert_eq!(
            ChatRef::parse_strict("@news_chan"),
            Some(ChatRef::Handle("news_chan".into()))
        );
        assert_eq!(ChatRef::parse_strict("???"), None);
        assert_eq!(ChatRef::parse_strict("@ab"), None);
    }

    #[test]
    fn power_time_parse() {
        let t = PowerTime::parse("09:30").unwrap();
        assert_eq!((t.hour, t.minute), (9, 30));
        assert_eq!(t.to_string(), "09:30");
        assert!(PowerTime::parse("24:00").is_err());
        assert!(PowerTime::parse("12:60").is_err());
        assert!(PowerTime::parse("noon").is_err());
    }

    #[test]
    fn watermark_position_roundtrip() {
        for s in ["bottom-right", "bottom-left", "top-right", "top-left", "center"] {
            assert_eq!(WatermarkPosition::parse(s).unwrap().as_str(), s);
        }
        assert!(WatermarkPosition::parse("middle").is_err());
    }

    #[test]
    fn filter_parse_user_ids() {
        let f = Filter::parse(1, 1, "user", "123, 456", true).unwrap();
        assert!(matches!(f.kind, FilterKind::User(ref ids) if ids == &[123, 456]));
    }

    #[test]
    fn filter_parse_bad_user_ids_skipped() {
        assert!(Filter::parse(1, 1, "user", "123, abc", true).is_none());
    }

    #[test]
    fn filter_parse_keywords_lowercased() {
        let f = Filter::parse(1, 1, "keyword", "Sale, PROMO ,", false).unwrap();
        assert!(matches!(f.kind, FilterKind::Keyword(ref k) if k == &["sale", "promo"]));
    }

    #[test]
    fn filter_parse_invalid_regex_skipped() {
        assert!(Filter::parse(1, 1, "regex", "([unclosed", true).is_none());
    }

    #[test]
    fn filter_parse_crypto_tokens() {
        let f = Filter::parse(1, 1, "crypto", "only_crypto", false).unwrap();
        assert!(matches!(f.kind, FilterKind::Crypto(CryptoMode::Only)));
        let f = Filter::parse(1, 1, "crypto", "NO_CRYPTO", false).unwrap();
        assert!(matches!(f.kind, FilterKind::Crypto(CryptoMode::Exclude)));
        assert!(Filter::parse(1, 1, "crypto", "maybe_crypto", false).is_none());
    }

    #[test]
    fn task_update_validation() {
        let mut update = TaskUpdate {
            forward_delay: Some(Some(5)),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
        update.forward_delay = Some(Some(0));
        assert!(update.validate().is_err());
        update.forward_delay = None;
        update.translate_to = Some(Some("xx".into()));
        assert!(update.validate().is_err());
    }

    #[test]
    fn cleaner_options_default_all_on() {
        let opts = CleanerOptions::default();
        assert!(opts.remove_usernames && opts.remove_urls);
        assert!(opts.remove_hashtags && opts.remove_markdown_links);
    }
}
