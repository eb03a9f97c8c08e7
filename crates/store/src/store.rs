//! Action store.
//!
//! Persists scheduled actions in `actions.json` under the configured state
//! path. Every public operation takes the write lock for its full duration,
//! so each call is linearizable against the others: the engine may poll
//! from one worker while the dialogue loop inserts from another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use ha_domain::action::{ActionStatus, NewAction, ScheduledAction};
use ha_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// On-disk format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    /// Next id to hand out. Ids are never reused, even after deletes.
    next_id: u64,
    actions: Vec<ScheduledAction>,
}

struct Inner {
    next_id: u64,
    actions: HashMap<u64, ScheduledAction>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ActionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed store for [`ScheduledAction`] rows.
pub struct ActionStore {
    persist_path: PathBuf,
    inner: RwLock<Inner>,
}

impl ActionStore {
    /// Load or create the store at `state_path/actions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let persist_path = state_path.join("actions.json");

        let file: StoreFile = if persist_path.exists() {
            let raw = std::fs::read_to_string(&persist_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            StoreFile::default()
        };

        let mut actions = HashMap::new();
        let mut max_id = 0u64;
        for action in file.actions {
            max_id = max_id.max(action.id);
            actions.insert(action.id, action);
        }
        // Guard against a stale counter in a hand-edited file.
        let next_id = file.next_id.max(max_id + 1).max(1);

        tracing::info!(
            actions = actions.len(),
            path = %persist_path.display(),
            "action store loaded"
        );

        Ok(Self {
            persist_path,
            inner: RwLock::new(Inner { next_id, actions }),
        })
    }

    /// Insert a new action with initial status `scheduled`. Returns its id.
    pub async fn insert(&self, new: NewAction) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let action = ScheduledAction {
            id,
            command: new.command,
            trigger_time: new.trigger_time,
            completion_mode: new.completion_mode,
            retry_until: new.retry_until,
            status: ActionStatus::Scheduled,
            attempt_count: 0,
            last_attempt: None,
            context: new.context,
            recurring: new.recurring,
            recurring_interval_seconds: new.recurring_interval_seconds,
            recurring_until: new.recurring_until,
            parent_recurring_id: new.parent_recurring_id,
            created_at: Utc::now(),
        };
        inner.actions.insert(id, action);
        self.persist(&inner).await?;
        Ok(id)
    }

    /// All rows with status `scheduled` or `active` whose trigger time has
    /// passed, ordered by trigger time ascending (ties by id).
    pub async fn due_actions(&self, now: DateTime<Utc>) -> Vec<ScheduledAction> {
        let inner = self.inner.read().await;
        let mut due: Vec<ScheduledAction> = inner
            .actions
            .values()
            .filter(|a| {
                matches!(a.status, ActionStatus::Scheduled | ActionStatus::Active)
                    && a.trigger_time <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|a| (a.trigger_time, a.id));
        due
    }

    /// Atomically set the status of an action, validating the transition.
    ///
    /// When `attempt_count` is supplied it is stored and `last_attempt` is
    /// stamped with the current instant.
    pub async fn update_status(
        &self,
        id: u64,
        status: ActionStatus,
        attempt_count: Option<u32>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let action = inner
            .actions
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("no action with id {id}")))?;

        // Same-status updates are idempotent stamps, not transitions; a row
        // left `active` by an interrupted tick must be re-activatable.
        if action.status != status && !action.status.can_transition_to(status) {
            return Err(Error::Store(format!(
                "illegal status transition {:?} -> {:?} for action {id}",
                action.status, status
            )));
        }

        action.status = status;
        if let Some(count) = attempt_count {
            action.attempt_count = count;
            action.last_attempt = Some(Utc::now());
        }
        self.persist(&inner).await
    }

    /// Update the trigger time only (used to schedule a retry).
    pub async fn reschedule(&self, id: u64, new_trigger_time: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let action = inner
            .actions
            .get_mut(&id)
            .ok_or_else(|| Error::Store(format!("no action with id {id}")))?;
        action.trigger_time = new_trigger_time;
        self.persist(&inner).await
    }

    /// All rows, ordered by trigger time ascending.
    pub async fn list_all(&self) -> Vec<ScheduledAction> {
        let inner = self.inner.read().await;
        let mut all: Vec<ScheduledAction> = inner.actions.values().cloned().collect();
        all.sort_by_key(|a| (a.trigger_time, a.id));
        all
    }

    /// Look up a single row.
    pub async fn get(&self, id: u64) -> Option<ScheduledAction> {
        self.inner.read().await.actions.get(&id).cloned()
    }

    /// Delete a row. Returns true if it existed.
    pub async fn delete(&self, id: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.actions.remove(&id).is_some();
        if removed {
            self.persist(&inner).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, inner: &Inner) -> Result<()> {
        let mut actions: Vec<ScheduledAction> = inner.actions.values().cloned().collect();
        actions.sort_by_key(|a| a.id);
        let file = StoreFile {
            next_id: inner.next_id,
            actions,
        };
        let json = serde_json::to_string_pretty(&file)?;
        let path = self.persist_path.clone();

        // Blocking write off the executor, same-directory temp + rename so a
        // crash mid-write never truncates the store.
        tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Store(format!("persist task failed: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
