//! Configuration types and fixed vocabularies.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Minimum per-task forward delay, seconds.
pub const FORWARD_DELAY_MIN: u32 = 1;
/// Maximum per-task forward delay, seconds.
pub const FORWARD_DELAY_MAX: u32 = 3600;

/// Pause between sends in bulk/broadcast operations. Keeps us under the
/// transport's rate limits; the per-task forwarding path never uses it.
pub const BULK_SEND_PAUSE: Duration = Duration::from_millis(100);

/// Language codes the translation collaborator accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh", "ar", "hi", "tr", "pl", "nl", "id",
    "vi", "th", "fa", "ur",
];

/// Vocabulary checked by the crypto filter.
pub const CRYPTO_KEYWORDS: &[&str] = &[
    "btc",
    "bitcoin",
    "eth",
    "ethereum",
    "crypto",
    "cryptocurrency",
    "blockchain",
    "wallet",
    "binance",
    "coinbase",
    "trading",
    "signal",
    "pump",
    "dump",
    "moon",
    "token",
    "nft",
    "defi",
    "airdrop",
];

/// Check whether a language code is in the supported set.
pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// Runtime configuration, read from the environment.
#[derive(Clone)]
pub struct BotConfig {
    /// Telegram Bot API token.
    pub bot_token: SecretString,
    /// Path to the local libsql database file.
    pub db_path: String,
    /// Translation service endpoint (optional; translation degrades to
    /// identity when unset).
    pub translate_api_url: Option<String>,
    /// Watermark service endpoint (optional; delivery falls back to
    /// unwatermarked media when unset).
    pub watermark_api_url: Option<String>,
    /// How often the power scheduler checks for due triggers.
    pub scheduler_tick: Duration,
    /// Timeout applied to transport/translation/watermark HTTP calls.
    pub http_timeout: Duration,
    /// User ids allowed to run admin commands (broadcast, global stats).
    pub admin_ids: Vec<i64>,
}

impl BotConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN".into()))?;

        let db_path =
            std::env::var("RELAYBOT_DB_PATH").unwrap_or_else(|_| "./data/relaybot.db".to_string());

        let scheduler_tick_secs: u64 = std::env::var("RELAYBOT_SCHEDULER_TICK_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let http_timeout_secs: u64 = std::env::var("RELAYBOT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let admin_ids = std::env::var("ADMIN_IDS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|part| part.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            db_path,
            translate_api_url: std::env::var("TRANSLATE_API_URL").ok(),
            watermark_api_url: std::env::var("WATERMARK_API_URL").ok(),
            scheduler_tick: Duration::from_secs(scheduler_tick_secs),
            http_timeout: Duration::from_secs(http_timeout_secs),
            admin_ids,
        })
    }

}
