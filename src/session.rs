//! Task-setup conversation state machine for private chats.
//!
//! Progresses linearly: AwaitingSource → AwaitingDestination → done.
//! One session per user; starting a new one replaces the old.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::model::{ChatRef, User};
use crate::pipeline::ForwardEngine;
use crate::scheduler::PowerScheduler;
use crate::store::Store;
use crate::transport::Transport;

/// The phases of the task-setup conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    AwaitingSource,
    AwaitingDestination,
}

impl SetupPhase {
    pub fn next(&self) -> Option<SetupPhase> {
        match self {
            Self::AwaitingSource => Some(Self::AwaitingDestination),
            Self::AwaitingDestination => None,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Self::AwaitingSource => {
                "Send the source chat: a numeric id or an @handle."
            }
            Self::AwaitingDestination => {
                "Send the destination chat: a numeric id or an @handle."
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SetupSession {
    phase: SetupPhase,
    source: Option<ChatRef>,
}

impl SetupSession {
    fn new() -> Self {
        Self {
            phase: SetupPhase::AwaitingSource,
            source: None,
        }
    }
}

/// Routes private-chat messages: commands plus in-progress setup input.
pub struct SessionManager {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    engine: Arc<ForwardEngine>,
    scheduler: Arc<PowerScheduler>,
    admin_ids: Vec<i64>,
    sessions: Mutex<HashMap<i64, SetupSession>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        engine: Arc<ForwardEngine>,
        scheduler: Arc<PowerScheduler>,
        admin_ids: Vec<i64>,
    ) -> Self {
        Self {
            store,
            transport,
            engine,
            scheduler,
            admin_ids,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle_private(
        &self,
        chat_id: i64,
        user_id: i64,
        username: Option<&str>,
        text: &str,
    ) {
        let reply = self.dispatch(user_id, username, text).await;
        if let Err(error) = self
            .transport
            .send_text(&ChatRef::Id(chat_id), &reply)
            .await
        {
            warn!(chat_id, %error, "Private reply failed");
        }
    }

    async fn dispatch(&self, user_id: i64, username: Option<&str>, text: &str) -> String {
        let command = text.trim();

        match command {
            "/start" => {
                let user = User {
                    user_id,
                    username: username.map(String::from),
                    first_name: None,
                    last_name: None,
                    joined_at: chrono::Utc::now(),
                    banned: false,
                };
                if let Err(error) = self.store.add_user(&user).await {
                    warn!(user_id, %error, "User registration failed");
                }
                "Forwarding bot ready.\n\
                 /newtask — set up a forward task\n\
                 /mytasks — list your tasks\n\
                 /stats — your forwarding totals\n\
                 /cancel — abort the current setup"
                    .to_string()
            }
            "/newtask" => {
                let mut sessions = self.sessions.lock().await;
                sessions.insert(user_id, SetupSession::new());
                SetupPhase::AwaitingSource.prompt().to_string()
            }
            "/cancel" => {
                let removed = self.sessions.lock().await.remove(&user_id).is_some();
                if removed {
                    "Setup cancelled.".to_string()
                } else {
                    "Nothing to cancel.".to_string()
                }
            }
            "/mytasks" => self.list_tasks(user_id).await,
            "/stats" => match self.store.get_user_stats(user_id).await {
                Ok(stats) => format!("Messages forwarded: {}", stats.total_forwarded),
                Err(error) => {
                    warn!(user_id, %error, "Stats lookup failed");
                    "Could not load statistics.".to_string()
                }
            },
            "/globalstats" => self.global_stats(user_id).await,
            other if other.starts_with("/deltask") => self.delete_task(user_id, other).await,
            other if other.starts_with("/broadcast") => self.broadcast(user_id, other).await,
            other => self.advance_session(user_id, other).await,
        }
    }

    async fn global_stats(&self, user_id: i64) -> String {
        if !self.admin_ids.contains(&user_id) {
            return "Admin only command.".to_string();
        }
        match self.store.get_global_stats().await {
            Ok(stats) => format!(
                "Users: {}\nTasks: {}\nForwarded: {}",
                stats.total_users, stats.total_tasks, stats.total_forwarded
            ),
            Err(error) => {
                warn!(%error, "Global stats lookup failed");
                "Could not load statistics.".to_string()
            }
        }
    }

    async fn broadcast(&self, user_id: i64, command: &str) -> String {
        if !self.admin_ids.contains(&user_id) {
            return "Admin only command.".to_string();
        }
        let text = command.strip_prefix("/broadcast").map(str::trim).unwrap_or("");
        if text.is_empty() {
            return "Usage: /broadcast <message>".to_string();
        }
        let (sent, failed) = self.engine.broadcast(text).await;
        format!("Broadcast complete.\nSent: {sent}\nFailed: {failed}")
    }

    async fn list_tasks(&self, user_id: i64) -> String {
        match self.store.get_user_tasks(user_id).await {
            Ok(tasks) if tasks.is_empty() => "No tasks yet. Use /newtask.".to_string(),
            Ok(tasks) => tasks
                .iter()
                .map(|task| {
                    format!(
                        "#{} {} → {} [{}]",
                        task.id,
                        task.source.storage_key(),
                        task.destination.storage_key(),
                        if task.enabled { "on" } else { "off" },
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(error) => {
                warn!(user_id, %error, "Task list failed");
                "Could not load tasks.".to_string()
            }
        }
    }

    async fn delete_task(&self, user_id: i64, command: &str) -> String {
        let Some(task_id) = command
            .strip_prefix("/deltask")
            .map(str::trim)
            .and_then(|arg| arg.parse::<i64>().ok())
        else {
            return "Usage: /deltask <task id>".to_string();
        };

        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return format!("No task #{task_id}."),
            Err(error) => {
                warn!(task_id, %error, "Task lookup failed");
                return format!("Could not look up task #{task_id}.");
            }
        };
        if task.owner_id != user_id {
            return format!("Task #{task_id} is not yours.");
        }
        match self.store.delete_task(task_id).await {
            Ok(()) => {
                self.scheduler.unregister(task_id).await;
                format!("Task #{task_id} deleted.")
            }
            Err(error) => {
                warn!(task_id, %error, "Task deletion failed");
                format!("Could not delete task #{task_id}.")
            }
        }
    }

    /// Feed free text into the user's setup session, if one is open.
    async fn advance_session(&self, user_id: i64, input: &str) -> String {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&user_id) else {
            return "Unknown input. Use /newtask to set up a task.".to_string();
        };

        let Some(chat) = ChatRef::parse_strict(input) else {
            return format!("That is not a chat id or @handle. {}", session.phase.prompt());
        };

        match session.phase {
            SetupPhase::AwaitingSource => {
                session.source = Some(chat);
                // next() is Some here by construction
                if let Some(next) = session.phase.next() {
                    session.phase = next;
                }
                SetupPhase::AwaitingDestination.prompt().to_string()
            }
            SetupPhase::AwaitingDestination => {
                let Some(source) = session.source.clone() else {
                    sessions.remove(&user_id);
                    return "Setup lost its source, start over with /newtask.".to_string();
                };
                sessions.remove(&user_id);

                match self
                    .store
                    .create_task(user_id, &source, None, &chat, None)
                    .await
                {
                    Ok(task_id) => format!(
                        "Task #{task_id} created: {} → {}",
                        source.storage_key(),
                        chat.storage_key()
                    ),
                    Err(error) => {
                        warn!(user_id, %error, "Task creation failed");
                        "Could not create the task.".to_string()
                    }
                }
            }
        }
    }
}
