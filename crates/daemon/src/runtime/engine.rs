//! Scheduled-action engine.
//!
//! A single long-running worker. Every tick it drains the due actions in
//! trigger-time order, asks the completion oracle about each one, and
//! drives the per-action state machine: complete, retry, spawn the next
//! recurring occurrence, or expire. Processing is deliberately sequential
//! so camera and hardware use stays serialized.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use ha_domain::action::{ActionStatus, ScheduledAction};
use ha_domain::error::Result;
use ha_hardware::MotionDispatcher;
use ha_senses::Speaker;
use ha_store::ActionStore;

use super::oracle::CompletionJudge;

pub struct ActionEngine {
    store: Arc<ActionStore>,
    judge: Arc<dyn CompletionJudge>,
    speaker: Arc<dyn Speaker>,
    dispatcher: MotionDispatcher,
    check_interval: Duration,
}

impl ActionEngine {
    pub fn new(
        store: Arc<ActionStore>,
        judge: Arc<dyn CompletionJudge>,
        speaker: Arc<dyn Speaker>,
        dispatcher: MotionDispatcher,
        check_interval_secs: u64,
    ) -> Self {
        Self {
            store,
            judge,
            speaker,
            dispatcher,
            check_interval: Duration::from_secs(check_interval_secs),
        }
    }

    /// Worker loop. Shutdown is observed between ticks, never mid-action.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "action engine started"
        );
        loop {
            self.tick_at(Utc::now()).await;
            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                tracing::info!("action engine stopped");
                return;
            }
        }
    }

    /// One tick: drain everything due at `now`, sequentially.
    ///
    /// Per-action failures are caught here; the action stays `active` with
    /// its counter unchanged so the next tick retries it.
    pub async fn tick_at(&self, now: DateTime<Utc>) {
        let due = self.store.due_actions(now).await;
        for action in due {
            if let Err(e) = self.process(&action, now).await {
                tracing::error!(action_id = action.id, error = %e, "action processing failed");
            }
        }
    }

    async fn process(&self, action: &ScheduledAction, now: DateTime<Utc>) -> Result<()> {
        // Expiry pre-check: once the deadline has passed the action is dead,
        // no matter what the oracle would have said. No further invocation.
        if let Some(deadline) = action.retry_until {
            if now > deadline {
                self.store
                    .update_status(action.id, ActionStatus::Expired, None)
                    .await?;
                tracing::info!(action_id = action.id, "action expired");
                return Ok(());
            }
        }

        self.store
            .update_status(action.id, ActionStatus::Active, Some(action.attempt_count))
            .await?;

        tracing::info!(
            action_id = action.id,
            command = %action.command,
            attempt = action.attempt_count + 1,
            "executing scheduled action"
        );
        let verdict = self.judge.judge(action, now).await;

        // Side effects first: motion is queued, speech is awaited so the
        // voice lands before the next action begins.
        if !verdict.act.is_empty() {
            self.dispatcher.enqueue_tuples(&verdict.act);
        }
        if !verdict.vr.is_empty() {
            if let Err(e) = self.speaker.speak(&verdict.vr).await {
                tracing::warn!(action_id = action.id, error = %e, "verdict speech failed");
            }
        }

        if verdict.completed {
            self.store
                .update_status(action.id, ActionStatus::Completed, None)
                .await?;
            tracing::info!(
                action_id = action.id,
                reason = %verdict.completion_reason,
                "action completed"
            );
            if let Some(child) = action.next_occurrence(now) {
                let child_trigger = child.trigger_time;
                let child_id = self.store.insert(child).await?;
                tracing::info!(
                    action_id = action.id,
                    child_id,
                    next_trigger = %child_trigger,
                    "recurring occurrence spawned"
                );
            }
        } else if verdict.should_retry {
            let next_attempt = now + chrono::Duration::seconds(verdict.retry_delay_seconds as i64);
            self.store.reschedule(action.id, next_attempt).await?;
            self.store
                .update_status(
                    action.id,
                    ActionStatus::Scheduled,
                    Some(action.attempt_count + 1),
                )
                .await?;
            tracing::info!(
                action_id = action.id,
                retry_at = %next_attempt,
                "action will retry"
            );
        } else {
            // Neither done nor retryable: close it out rather than loop.
            self.store
                .update_status(action.id, ActionStatus::Completed, None)
                .await?;
            tracing::warn!(action_id = action.id, "verdict neither completed nor retry, finalizing");
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use ha_domain::action::{CompletionMode, NewAction, Verdict};
    use ha_domain::config::HardwareConfig;
    use ha_domain::error::Result;
    use ha_hardware::{RecordingSink, ServoController};
    use parking_lot::Mutex;

    /// Judge that replays scripted verdicts and counts invocations.
    struct ScriptedJudge {
        verdicts: Mutex<Vec<Verdict>>,
        calls: Mutex<u32>,
    }

    impl ScriptedJudge {
        fn new(verdicts: Vec<Verdict>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts.into_iter().rev().collect()),
                calls: Mutex::new(0),
            })
        }
        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl CompletionJudge for ScriptedJudge {
        async fn judge(&self, _action: &ScheduledAction, _now: DateTime<Utc>) -> Verdict {
            *self.calls.lock() += 1;
            self.verdicts.lock().pop().unwrap_or_else(|| {
                Verdict {
                    vr: String::new(),
                    act: Vec::new(),
                    completed: true,
                    should_retry: false,
                    retry_delay_seconds: 0,
                    completion_reason: "default".into(),
                }
            })
        }
    }

    struct SilentSpeaker;
    #[async_trait]
    impl Speaker for SilentSpeaker {
        async fn speak(&self, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    fn completed_verdict(reason: &str) -> Verdict {
        Verdict {
            vr: "done".into(),
            act: Vec::new(),
            completed: true,
            should_retry: false,
            retry_delay_seconds: 0,
            completion_reason: reason.into(),
        }
    }

    fn retry_verdict(delay: u32) -> Verdict {
        Verdict {
            vr: "not yet".into(),
            act: Vec::new(),
            completed: false,
            should_retry: true,
            retry_delay_seconds: delay,
            completion_reason: "condition not met".into(),
        }
    }

    fn engine_with(
        store: Arc<ActionStore>,
        judge: Arc<ScriptedJudge>,
    ) -> ActionEngine {
        let controller =
            ServoController::new(Box::new(RecordingSink::new()), &HardwareConfig::default());
        let dispatcher = MotionDispatcher::spawn(controller, 8);
        ActionEngine::new(store, judge, Arc::new(SilentSpeaker), dispatcher, 10)
    }

    fn one_shot(command: &str, trigger_time: DateTime<Utc>) -> NewAction {
        NewAction {
            command: command.into(),
            trigger_time,
            completion_mode: CompletionMode::OneShot,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn one_shot_reminder_completes_without_children() {
        // S1: "Remind me to drink water", trigger now+60s.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let start = Utc::now();

        let id = store
            .insert(one_shot(
                "Remind me to drink water",
                start + ChronoDuration::seconds(60),
            ))
            .await
            .unwrap();

        let judge = ScriptedJudge::new(vec![completed_verdict("reminder delivered")]);
        let engine = engine_with(store.clone(), judge.clone());

        // Before the trigger: nothing happens.
        engine.tick_at(start).await;
        assert_eq!(judge.calls(), 0);
        assert_eq!(store.get(id).await.unwrap().status, ActionStatus::Scheduled);

        // After the trigger: scheduled → active → completed.
        engine.tick_at(start + ChronoDuration::seconds(61)).await;
        assert_eq!(judge.calls(), 1);
        let row = store.get(id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Completed);
        assert_eq!(store.list_all().await.len(), 1, "no child spawned");
    }

    #[tokio::test]
    async fn wake_up_retries_until_condition_met() {
        // S2: retry_with_condition, three retries of 120 s, then done.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let t0 = Utc::now();

        let id = store
            .insert(NewAction {
                command: "Wake me up".into(),
                trigger_time: t0,
                completion_mode: CompletionMode::RetryWithCondition,
                retry_until: Some(t0 + ChronoDuration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();

        let judge = ScriptedJudge::new(vec![
            retry_verdict(120),
            retry_verdict(120),
            retry_verdict(120),
            completed_verdict("user is out of bed"),
        ]);
        let engine = engine_with(store.clone(), judge.clone());

        let mut now = t0;
        let mut previous_attempt_stamp = None;
        for _ in 0..3 {
            engine.tick_at(now).await;
            let row = store.get(id).await.unwrap();
            assert_eq!(row.status, ActionStatus::Scheduled);
            // last_attempt is monotonic across retries.
            assert!(row.last_attempt >= previous_attempt_stamp);
            previous_attempt_stamp = row.last_attempt;
            now = row.trigger_time + ChronoDuration::seconds(1);
        }

        engine.tick_at(now).await;
        let row = store.get(id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Completed);
        assert_eq!(row.attempt_count, 3, "one increment per non-finalizing attempt");
        assert_eq!(judge.calls(), 4);
    }

    #[tokio::test]
    async fn recurring_series_preserves_root_and_deadline() {
        // S3: interval 300 s, series ends 10 minutes in; at most three
        // completions and every child points at the root.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let t0 = Utc::now();

        let root_id = store
            .insert(NewAction {
                command: "Check that I am not on my phone".into(),
                trigger_time: t0 + ChronoDuration::minutes(2),
                completion_mode: CompletionMode::OneShot,
                recurring: true,
                recurring_interval_seconds: Some(300),
                recurring_until: Some(t0 + ChronoDuration::minutes(10)),
                ..Default::default()
            })
            .await
            .unwrap();

        let judge = ScriptedJudge::new(vec![
            completed_verdict("checked"),
            completed_verdict("checked"),
            completed_verdict("checked"),
        ]);
        let engine = engine_with(store.clone(), judge.clone());

        // Drive ticks across the ten-minute window.
        let mut now = t0;
        let end = t0 + ChronoDuration::minutes(12);
        while now <= end {
            engine.tick_at(now).await;
            now += ChronoDuration::seconds(10);
        }

        let all = store.list_all().await;
        let completed: Vec<_> = all
            .iter()
            .filter(|a| a.status == ActionStatus::Completed)
            .collect();
        assert!(completed.len() <= 3, "at most root + two children complete");
        assert!(completed.len() >= 2);

        for child in all.iter().filter(|a| a.id != root_id) {
            assert_eq!(child.parent_recurring_id, Some(root_id));
            assert_eq!(child.recurring_interval_seconds, Some(300));
        }
        // Past recurring_until, no pending occurrence remains.
        assert!(all
            .iter()
            .all(|a| a.status != ActionStatus::Scheduled));
    }

    #[tokio::test]
    async fn expiry_skips_oracle_after_deadline() {
        // S4: retry_until = T+30 s; oracle wants a 60 s retry at T. At the
        // next tick past the deadline the action expires without another
        // oracle invocation.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let t0 = Utc::now();

        let id = store
            .insert(NewAction {
                command: "Tell me to leave for the train".into(),
                trigger_time: t0,
                completion_mode: CompletionMode::RetryUntilAcknowledged,
                retry_until: Some(t0 + ChronoDuration::seconds(30)),
                ..Default::default()
            })
            .await
            .unwrap();

        let judge = ScriptedJudge::new(vec![retry_verdict(60)]);
        let engine = engine_with(store.clone(), judge.clone());

        engine.tick_at(t0).await;
        let row = store.get(id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Scheduled);
        assert_eq!(row.attempt_count, 1);
        assert_eq!(judge.calls(), 1);

        // Next tick after the deadline: expired, oracle untouched.
        engine.tick_at(t0 + ChronoDuration::seconds(70)).await;
        let row = store.get(id).await.unwrap();
        assert_eq!(row.status, ActionStatus::Expired);
        assert_eq!(judge.calls(), 1, "no oracle call past the deadline");

        // And it is never triggered again.
        engine.tick_at(t0 + ChronoDuration::seconds(500)).await;
        assert_eq!(judge.calls(), 1);
    }

    #[tokio::test]
    async fn defensive_completion_for_contradictory_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let t0 = Utc::now();
        let id = store.insert(one_shot("odd", t0)).await.unwrap();

        let judge = ScriptedJudge::new(vec![Verdict {
            vr: String::new(),
            act: Vec::new(),
            completed: false,
            should_retry: false,
            retry_delay_seconds: 0,
            completion_reason: "confused".into(),
        }]);
        let engine = engine_with(store.clone(), judge);

        engine.tick_at(t0).await;
        assert_eq!(
            store.get(id).await.unwrap().status,
            ActionStatus::Completed,
            "neither-completed-nor-retry finalizes defensively"
        );
    }

    #[tokio::test]
    async fn due_actions_processed_in_trigger_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let t0 = Utc::now();

        // Inserted out of order on purpose.
        let later = store
            .insert(one_shot("later", t0 - ChronoDuration::seconds(10)))
            .await
            .unwrap();
        let earlier = store
            .insert(one_shot("earlier", t0 - ChronoDuration::seconds(90)))
            .await
            .unwrap();

        /// Judge that records which action ids it saw, in order.
        struct OrderJudge {
            seen: Mutex<Vec<u64>>,
        }
        #[async_trait]
        impl CompletionJudge for OrderJudge {
            async fn judge(&self, action: &ScheduledAction, _now: DateTime<Utc>) -> Verdict {
                self.seen.lock().push(action.id);
                Verdict {
                    vr: String::new(),
                    act: Vec::new(),
                    completed: true,
                    should_retry: false,
                    retry_delay_seconds: 0,
                    completion_reason: String::new(),
                }
            }
        }

        let judge = Arc::new(OrderJudge {
            seen: Mutex::new(Vec::new()),
        });
        let controller =
            ServoController::new(Box::new(RecordingSink::new()), &HardwareConfig::default());
        let dispatcher = MotionDispatcher::spawn(controller, 8);
        let engine = ActionEngine::new(
            store.clone(),
            judge.clone(),
            Arc::new(SilentSpeaker),
            dispatcher,
            10,
        );

        engine.tick_at(t0).await;
        assert_eq!(*judge.seen.lock(), vec![earlier, later]);
    }
}
