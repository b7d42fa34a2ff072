//! Forward engine — drives one message through gate, filters, dedup,
//! transform, delay, and delivery, then records the outcome.
//!
//! Each (message, task) pair runs as its own tokio task, so a per-task
//! delay suspends only that pair. The dedup claim is an atomic
//! conditional insert taken before the send: whichever worker wins the
//! insert delivers, every other worker sees a duplicate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::config::BULK_SEND_PAUSE;
use crate::content::IncomingMessage;
use crate::model::{ChatRef, Task};
use crate::pipeline::dedup;
use crate::pipeline::dispatch::DeliveryDispatcher;
use crate::pipeline::filters::FilterPipeline;
use crate::pipeline::transform::TransformPipeline;
use crate::pipeline::types::{FilterVerdict, ForwardOutcome, SkipStage};
use crate::store::Store;
use crate::translate::Translator;

pub struct ForwardEngine {
    store: Arc<dyn Store>,
    dispatcher: DeliveryDispatcher,
    translator: Option<Arc<dyn Translator>>,
    in_flight: Mutex<HashSet<(i64, i64)>>,
}

impl ForwardEngine {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: DeliveryDispatcher,
        translator: Option<Arc<dyn Translator>>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            translator,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Fan one incoming post out to every enabled task watching its
    /// source chat, one tokio task per pair.
    pub async fn handle_post(self: &Arc<Self>, message: IncomingMessage) {
        let tasks = match self
            .store
            .get_tasks_by_source(message.source_chat_id, message.source_chat_handle.as_deref())
            .await
        {
            Ok(tasks) => tasks,
            Err(error) => {
                error!(%error, "Task lookup failed, dropping message");
                return;
            }
        };

        for task in tasks {
            let engine = Arc::clone(self);
            let message = message.clone();
            tokio::spawn(async move {
                let outcome = engine.process(&task, &message).await;
                match &outcome {
                    ForwardOutcome::Delivered => {
                        info!(task_id = task.id, message_id = message.message_id, "Forwarded");
                    }
                    ForwardOutcome::Skipped(stage) => {
                        debug!(
                            task_id = task.id,
                            message_id = message.message_id,
                            %stage,
                            "Skipped"
                        );
                    }
                    ForwardOutcome::Failed(reason) => {
                        error!(
                            task_id = task.id,
                            message_id = message.message_id,
                            reason,
                            "Delivery failed"
                        );
                    }
                }
            });
        }
    }

    /// Run the full pipeline for one (message, task) pair.
    pub async fn process(&self, task: &Task, message: &IncomingMessage) -> ForwardOutcome {
        if !task.enabled {
            return ForwardOutcome::Skipped(SkipStage::Gated);
        }

        let key = (task.id, message.message_id);
        {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !in_flight.insert(key) {
                return ForwardOutcome::Skipped(SkipStage::InFlight);
            }
        }
        let outcome = self.process_guarded(task, message).await;
        match self.in_flight.lock() {
            Ok(mut guard) => {
                guard.remove(&key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&key);
            }
        }
        outcome
    }

    async fn process_guarded(&self, task: &Task, message: &IncomingMessage) -> ForwardOutcome {
        let filters = match self.store.get_task_filters(task.id).await {
            Ok(filters) => filters,
            Err(error) => {
                warn!(task_id = task.id, %error, "Filter load failed, applying none");
                Vec::new()
            }
        };
        if let FilterVerdict::Skip(stage) = FilterPipeline::evaluate(message, &filters) {
            return ForwardOutcome::Skipped(stage);
        }

        let hash = if task.remove_duplicates {
            dedup::fingerprint(message)
        } else {
            None
        };
        if let Some(hash) = &hash {
            match self.store.is_duplicate(task.id, hash).await {
                Ok(true) => return ForwardOutcome::Skipped(SkipStage::Duplicate),
                Ok(false) => {}
                Err(error) => {
                    warn!(task_id = task.id, %error, "Duplicate check failed, forwarding anyway");
                }
            }
        }

        let text = self.transform(task, message).await;

        if let Some(delay) = task.forward_delay {
            tokio::time::sleep(std::time::Duration::from_secs(u64::from(delay))).await;
        }

        // Claim the fingerprint before sending; a lost claim means a
        // concurrent worker already owns this content.
        let mut claimed = false;
        if let Some(hash) = &hash {
            match self
                .store
                .record_fingerprint(task.id, message.message_id, message.source_chat_id, hash)
                .await
            {
                Ok(true) => claimed = true,
                Ok(false) => return ForwardOutcome::Skipped(SkipStage::Duplicate),
                Err(error) => {
                    warn!(task_id = task.id, %error, "Fingerprint claim failed, forwarding anyway");
                }
            }
        }

        if let Err(error) = self.dispatcher.deliver(task, message, text.as_deref()).await {
            // A failed send releases the claim so the content can be
            // forwarded on a later attempt.
            if claimed
                && let Some(hash) = &hash
                && let Err(release_error) = self.store.remove_fingerprint(task.id, hash).await
            {
                warn!(task_id = task.id, %release_error, "Fingerprint release failed");
            }
            return ForwardOutcome::Failed(error.to_string());
        }

        if let Err(error) = self.store.increment_stat(task.owner_id, task.id).await {
            warn!(task_id = task.id, %error, "Statistics update failed");
        }
        ForwardOutcome::Delivered
    }

    /// Transform stages plus optional translation. Returns `None` when
    /// there is no text to carry (bare media, no header/footer).
    async fn transform(&self, task: &Task, message: &IncomingMessage) -> Option<String> {
        let base = message.primary_text().unwrap_or("");
        let transformed = TransformPipeline::apply(base, task, &message.buttons);
        if transformed.is_empty() {
            return None;
        }

        let Some(target) = task.translate_to.as_deref() else {
            return Some(transformed);
        };
        let Some(translator) = self.translator.as_ref() else {
            return Some(transformed);
        };
        match translator.translate(&transformed, target).await {
            Ok(translated) => Some(translated),
            Err(error) => {
                warn!(task_id = task.id, %error, "Translation failed, using original text");
                Some(transformed)
            }
        }
    }

    /// Send a text message to every known, unbanned user, pausing
    /// between sends. Returns (sent, failed).
    pub async fn broadcast(&self, text: &str) -> (usize, usize) {
        let users = match self.store.get_broadcast_users().await {
            Ok(users) => users,
            Err(error) => {
                error!(%error, "Broadcast user lookup failed");
                return (0, 0);
            }
        };

        let transport = self.dispatcher.transport();
        let mut sent = 0;
        let mut failed = 0;
        for user_id in users {
            match transport.send_text(&ChatRef::Id(user_id), text).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    warn!(user_id, %error, "Broadcast send failed");
                    failed += 1;
                }
            }
            tokio::time::sleep(BULK_SEND_PAUSE).await;
        }
        info!(sent, failed, "Broadcast finished");
        (sent, failed)
    }
}
