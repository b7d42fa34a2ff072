use std::sync::Arc;

use futures::StreamExt;

use relaybot::config::BotConfig;
use relaybot::pipeline::{DeliveryDispatcher, ForwardEngine};
use relaybot::scheduler::{PowerScheduler, spawn_scheduler};
use relaybot::session::SessionManager;
use relaybot::store::{LibSqlStore, Store};
use relaybot::translate::{HttpTranslator, Translator};
use relaybot::transport::{TelegramTransport, Transport, TransportUpdate};
use relaybot::watermark::{HttpWatermarker, Watermarker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export BOT_TOKEN=123456:ABC-...");
        std::process::exit(1);
    });

    eprintln!("📨 Relaybot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);

    // ── Database ─────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&config.db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {e}", config.db_path);
                std::process::exit(1);
            }),
    );

    // ── Transport and collaborators ──────────────────────────────────
    let telegram = Arc::new(TelegramTransport::new(&config.bot_token, config.http_timeout)?);
    telegram.health_check().await?;
    let transport: Arc<dyn Transport> = telegram.clone();

    let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;

    let translator: Option<Arc<dyn Translator>> = config
        .translate_api_url
        .clone()
        .map(|url| Arc::new(HttpTranslator::new(http.clone(), url)) as Arc<dyn Translator>);
    eprintln!(
        "   Translation: {}",
        if translator.is_some() { "enabled" } else { "disabled" }
    );

    let watermarker: Option<Arc<dyn Watermarker>> = config
        .watermark_api_url
        .clone()
        .map(|url| Arc::new(HttpWatermarker::new(http.clone(), url)) as Arc<dyn Watermarker>);
    eprintln!(
        "   Watermarking: {}",
        if watermarker.is_some() { "enabled" } else { "disabled" }
    );

    // ── Power scheduler ──────────────────────────────────────────────
    let scheduler = Arc::new(PowerScheduler::new(Arc::clone(&store)));
    let stored_tasks = store.get_all_tasks().await.unwrap_or_else(|e| {
        eprintln!("   Warning: Could not load tasks for the scheduler: {e}");
        Vec::new()
    });
    scheduler.load_tasks(&stored_tasks).await;
    let _scheduler_handle = spawn_scheduler(Arc::clone(&scheduler), config.scheduler_tick);
    eprintln!(
        "   Scheduler: {} tasks loaded, tick every {}s",
        stored_tasks.len(),
        config.scheduler_tick.as_secs()
    );

    // ── Engine and session routing ───────────────────────────────────
    let dispatcher = DeliveryDispatcher::new(Arc::clone(&transport), watermarker);
    let engine = Arc::new(ForwardEngine::new(Arc::clone(&store), dispatcher, translator));
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        Arc::clone(&engine),
        Arc::clone(&scheduler),
        config.admin_ids.clone(),
    ));

    eprintln!("   Listening for updates\n");
    let mut updates = telegram.start_updates();
    while let Some(update) = updates.next().await {
        match update {
            TransportUpdate::Post(message) => {
                engine.handle_post(message).await;
            }
            TransportUpdate::Private { chat_id, user_id, username, text } => {
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move {
                    sessions
                        .handle_private(chat_id, user_id, username.as_deref(), &text)
                        .await;
                });
            }
        }
    }

    Ok(())
}
