//! Power scheduler — daily on/off triggers that flip task enablement.
//!
//! Each task may carry one power-on and one power-off time of day.
//! Triggers live in memory keyed by (task id, role), so re-registering
//! a time replaces the previous trigger for that slot. A ticker loop
//! polls for due triggers and writes enablement through the same store
//! path that user commands use.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::ScheduleError;
use crate::model::{PowerTime, Task};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerRole {
    On,
    Off,
}

impl PowerRole {
    fn enables(&self) -> bool {
        matches!(self, PowerRole::On)
    }
}

struct PowerTrigger {
    schedule: cron::Schedule,
    next_fire: DateTime<Utc>,
}

pub struct PowerScheduler {
    store: Arc<dyn Store>,
    triggers: Mutex<HashMap<(i64, PowerRole), PowerTrigger>>,
}

impl PowerScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            triggers: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the daily trigger for one task slot.
    pub async fn register(
        &self,
        task_id: i64,
        role: PowerRole,
        time: PowerTime,
    ) -> Result<(), ScheduleError> {
        let expr = format!("0 {} {} * * *", time.minute, time.hour);
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| ScheduleError::InvalidCron {
            expr: expr.clone(),
            reason: e.to_string(),
        })?;
        let next_fire = schedule
            .upcoming(Utc)
            .next()
            .ok_or_else(|| ScheduleError::InvalidTime(time.to_string()))?;

        info!(task_id, ?role, %time, %next_fire, "Power trigger registered");
        self.triggers
            .lock()
            .await
            .insert((task_id, role), PowerTrigger { schedule, next_fire });
        Ok(())
    }

    /// Drop both triggers of a task, e.g. on task deletion.
    pub async fn unregister(&self, task_id: i64) {
        let mut triggers = self.triggers.lock().await;
        triggers.remove(&(task_id, PowerRole::On));
        triggers.remove(&(task_id, PowerRole::Off));
    }

    /// Register triggers for every stored task that configures them.
    pub async fn load_tasks(&self, tasks: &[Task]) {
        for task in tasks {
            for (role, time) in [(PowerRole::On, task.power_on), (PowerRole::Off, task.power_off)] {
                if let Some(time) = time
                    && let Err(error) = self.register(task.id, role, time).await
                {
                    warn!(task_id = task.id, %error, "Skipping invalid power trigger");
                }
            }
        }
    }

    pub async fn tick(&self) {
        self.tick_at(Utc::now()).await;
    }

    /// Fire every trigger due at `now` and advance it to its next slot.
    pub async fn tick_at(&self, now: DateTime<Utc>) {
        let due: Vec<(i64, PowerRole)> = {
            let triggers = self.triggers.lock().await;
            triggers
                .iter()
                .filter(|(_, trigger)| trigger.next_fire <= now)
                .map(|(key, _)| *key)
                .collect()
        };

        for (task_id, role) in due {
            let enabled = role.enables();
            match self.store.set_task_enabled(task_id, enabled).await {
                Ok(()) => info!(task_id, enabled, "Power trigger fired"),
                Err(error) => error!(task_id, %error, "Power trigger write failed"),
            }

            let mut triggers = self.triggers.lock().await;
            if let Some(trigger) = triggers.get_mut(&(task_id, role)) {
                match trigger.schedule.after(&now).next() {
                    Some(next) => trigger.next_fire = next,
                    None => {
                        triggers.remove(&(task_id, role));
                    }
                }
            }
        }
    }
}

/// Spawn the scheduler ticker background task.
pub fn spawn_scheduler(scheduler: Arc<PowerScheduler>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            scheduler.tick().await;
        }
    })
}
