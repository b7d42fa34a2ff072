//! Filter pipeline — decides forward or skip for one message.
//!
//! Filters of one type form a logical rule; evaluation runs in a fixed
//! order (user → keyword → regex → crypto) and short-circuits at the
//! first failing type. Keyword and regex matching are case-insensitive
//! against the message's primary text. Malformed filter values never get
//! this far — they are dropped at parse time (`Filter::parse`).

use tracing::debug;

use crate::config::CRYPTO_KEYWORDS;
use crate::content::IncomingMessage;
use crate::model::{CryptoMode, Filter, FilterKind};
use crate::pipeline::types::{FilterVerdict, SkipStage};

/// Stateless filter evaluator.
pub struct FilterPipeline;

impl FilterPipeline {
    /// Evaluate a message against a task's filter set.
    pub fn evaluate(message: &IncomingMessage, filters: &[Filter]) -> FilterVerdict {
        if !Self::check_user(message.sender_id, filters) {
            debug!(message_id = message.message_id, "Rejected by user filter");
            return FilterVerdict::Skip(SkipStage::UserFilter);
        }

        let text = message.primary_text();

        if !Self::check_keyword(text, filters) {
            debug!(message_id = message.message_id, "Rejected by keyword filter");
            return FilterVerdict::Skip(SkipStage::KeywordFilter);
        }

        if !Self::check_regex(text, filters) {
            debug!(message_id = message.message_id, "Rejected by regex filter");
            return FilterVerdict::Skip(SkipStage::RegexFilter);
        }

        if !Self::check_crypto(text, filters) {
            debug!(message_id = message.message_id, "Rejected by crypto filter");
            return FilterVerdict::Skip(SkipStage::CryptoFilter);
        }

        FilterVerdict::Forward
    }

    /// Whitelist: the sender must be in the listed ids. Blacklist: the
    /// sender must not be. Each user filter row applies independently.
    fn check_user(sender_id: Option<i64>, filters: &[Filter]) -> bool {
        for filter in filters {
            let FilterKind::User(ref ids) = filter.kind else {
                continue;
            };
            let listed = sender_id.is_some_and(|id| ids.contains(&id));
            if filter.whitelist && !listed {
                return false;
            }
            if !filter.whitelist && listed {
                return false;
            }
        }
        true
    }

    /// Case-insensitive substring matching; messages without text pass
    /// vacuously (nothing to match against).
    fn check_keyword(text: Option<&str>, filters: &[Filter]) -> bool {
        let Some(text) = text else { return true };
        let text_lower = text.to_lowercase();

        for filter in filters {
            let FilterKind::Keyword(ref terms) = filter.kind else {
                continue;
            };
            let hit = terms.iter().any(|term| text_lower.contains(term.as_str()));
            if filter.whitelist && !hit {
                return false;
            }
            if !filter.whitelist && hit {
                return false;
            }
        }
        true
    }

    fn check_regex(text: Option<&str>, filters: &[Filter]) -> bool {
        let Some(text) = text else { return true };

        for filter in filters {
            let FilterKind::Regex(ref pattern) = filter.kind else {
                continue;
            };
            let hit = pattern.is_match(text);
            if filter.whitelist && !hit {
                return false;
            }
            if !filter.whitelist && hit {
                return false;
            }
        }
        true
    }

    /// `only_crypto` requires a vocabulary hit, `no_crypto` requires none.
    fn check_crypto(text: Option<&str>, filters: &[Filter]) -> bool {
        let Some(text) = text else { return true };

        let crypto_filters: Vec<&Filter> = filters
            .iter()
            .filter(|f| matches!(f.kind, FilterKind::Crypto(_)))
            .collect();
        if crypto_filters.is_empty() {
            return true;
        }

        let text_lower = text.to_lowercase();
        let has_crypto = CRYPTO_KEYWORDS.iter().any(|kw| text_lower.contains(kw));

        for filter in crypto_filters {
            let FilterKind::Crypto(mode) = filter.kind else {
                continue;
            };
            match mode {
                CryptoMode::Only if !has_crypto => return false,
                CryptoMode::Exclude if has_crypto => return false,
                _ => {}
            }
        }
        true
    }
}
