//! The scheduled-action data model.
//!
//! A [`ScheduledAction`] is a natural-language command plus a trigger time.
//! The engine never interprets the command itself — the completion oracle
//! (an LLM looking at the camera) decides whether the action is done.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & completion mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a scheduled action.
///
/// Legal transitions: `Scheduled → Active → {Completed, Scheduled}`,
/// `Scheduled → Expired`, `Active → Expired`. `Completed` and `Expired`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Scheduled,
    Active,
    Completed,
    Expired,
}

impl ActionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Scheduled, Active)
                | (Scheduled, Expired)
                | (Active, Completed)
                | (Active, Scheduled)
                | (Active, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Expired)
    }
}

/// How oracle verdicts drive the action's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Deliver once and mark complete.
    #[default]
    OneShot,
    /// Keep trying until the user responds.
    RetryUntilAcknowledged,
    /// Keep trying until the oracle observes the condition met.
    RetryWithCondition,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduledAction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A persisted scheduled action row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    /// Stable identifier, assigned by the store on insert.
    pub id: u64,
    /// Natural-language instruction handed to the completion oracle.
    pub command: String,
    /// Wall-clock instant when the action becomes due.
    pub trigger_time: DateTime<Utc>,
    #[serde(default)]
    pub completion_mode: CompletionMode,
    /// Deadline past which retries stop and the action expires.
    #[serde(default)]
    pub retry_until: Option<DateTime<Utc>>,
    pub status: ActionStatus,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Opaque context bag (e.g. the original transcript).
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurring_interval_seconds: Option<u64>,
    #[serde(default)]
    pub recurring_until: Option<DateTime<Utc>>,
    /// Id of the series root for spawned recurring occurrences.
    #[serde(default)]
    pub parent_recurring_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Insert-time fields for a new action. The store assigns `id`, stamps
/// `created_at`, and sets the initial status.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub command: String,
    pub trigger_time: DateTime<Utc>,
    pub completion_mode: CompletionMode,
    pub retry_until: Option<DateTime<Utc>>,
    pub context: HashMap<String, Value>,
    pub recurring: bool,
    pub recurring_interval_seconds: Option<u64>,
    pub recurring_until: Option<DateTime<Utc>>,
    pub parent_recurring_id: Option<u64>,
}

impl Default for NewAction {
    fn default() -> Self {
        Self {
            command: String::new(),
            trigger_time: DateTime::<Utc>::UNIX_EPOCH,
            completion_mode: CompletionMode::default(),
            retry_until: None,
            context: HashMap::new(),
            recurring: false,
            recurring_interval_seconds: None,
            recurring_until: None,
            parent_recurring_id: None,
        }
    }
}

impl ScheduledAction {
    /// Insert-time fields for the next occurrence of a recurring action.
    ///
    /// The child keeps the command, mode, interval, and series deadline;
    /// `parent_recurring_id` always points at the series root.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<NewAction> {
        if !self.recurring {
            return None;
        }
        let interval = self.recurring_interval_seconds?;
        if let Some(until) = self.recurring_until {
            if now >= until {
                return None;
            }
        }
        Some(NewAction {
            command: self.command.clone(),
            trigger_time: now + chrono::Duration::seconds(interval as i64),
            completion_mode: self.completion_mode,
            retry_until: None,
            context: self.context.clone(),
            recurring: true,
            recurring_interval_seconds: Some(interval),
            recurring_until: self.recurring_until,
            parent_recurring_id: Some(self.parent_recurring_id.unwrap_or(self.id)),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Oracle verdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured result of one completion-oracle invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// Text to speak.
    #[serde(default)]
    pub vr: String,
    /// Ordered robot action tuples (see [`ActionTuple`]).
    #[serde(default)]
    pub act: Vec<ActionTuple>,
    pub completed: bool,
    pub should_retry: bool,
    #[serde(default)]
    pub retry_delay_seconds: u32,
    #[serde(default)]
    pub completion_reason: String,
}

impl Verdict {
    /// Surrogate verdict for a failed frame capture: retry in 10 s.
    pub fn camera_failure() -> Self {
        Self {
            vr: String::new(),
            act: Vec::new(),
            completed: false,
            should_retry: true,
            retry_delay_seconds: 10,
            completion_reason: "camera failure".into(),
        }
    }

    /// Surrogate verdict for an oracle (LLM or parse) failure: retry in 60 s.
    pub fn oracle_failure(reason: &str) -> Self {
        Self {
            vr: String::new(),
            act: Vec::new(),
            completed: false,
            should_retry: true,
            retry_delay_seconds: 60,
            completion_reason: format!("oracle failure: {reason}"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue response & action tuples
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A raw action tuple as the model emits it: `[command_id, arg1, ...]`.
///
/// Command ids: 0 set_translation (absolute), 1 set_elevation (absolute),
/// 2 move_left (relative deg), 3 move_right (relative deg),
/// 4 move_servo (channel, value), 5 wait (seconds).
pub type ActionTuple = Vec<serde_json::Value>;

/// The model's structured reply in the main dialogue loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotResponse {
    /// Voice response.
    #[serde(default)]
    pub vr: String,
    /// Ordered action tuples.
    #[serde(default)]
    pub act: Vec<ActionTuple>,
    /// Whether a deferred follow-up is wanted.
    #[serde(default)]
    pub fu: bool,
    /// Prompt for the deferred follow-up.
    #[serde(default)]
    pub fp: String,
}

/// Current actuator state, fed to the LLM with each frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RobotState {
    pub elevation_servo_pos: i32,
    pub translation_servo_pos: i32,
    pub rotation_stepper_deg: i32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classification of a single user turn.
#[derive(Debug, Clone)]
pub enum Intent {
    /// A new scheduled action plus the confirmation to speak.
    Schedule {
        action: NewAction,
        confirmation: String,
    },
    /// Auxiliary context produced by the task sub-agent.
    TaskService { context_text: String },
    /// Auxiliary context produced by the search layer.
    Search { context_text: String },
    /// No side channel; answer directly.
    Plain,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn base_action() -> ScheduledAction {
        ScheduledAction {
            id: 7,
            command: "Remind me to stretch".into(),
            trigger_time: Utc::now(),
            completion_mode: CompletionMode::OneShot,
            retry_until: None,
            status: ActionStatus::Scheduled,
            attempt_count: 0,
            last_attempt: None,
            context: HashMap::new(),
            recurring: true,
            recurring_interval_seconds: Some(300),
            recurring_until: None,
            parent_recurring_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn legal_transitions() {
        use ActionStatus::*;
        assert!(Scheduled.can_transition_to(Active));
        assert!(Scheduled.can_transition_to(Expired));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Scheduled));
        assert!(Active.can_transition_to(Expired));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        use ActionStatus::*;
        for next in [Scheduled, Active, Completed, Expired] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Expired.can_transition_to(next));
        }
    }

    #[test]
    fn no_skipping_scheduled_to_completed() {
        assert!(!ActionStatus::Scheduled.can_transition_to(ActionStatus::Completed));
    }

    #[test]
    fn next_occurrence_preserves_series_root() {
        let now = Utc::now();
        let root = base_action();
        let child = root.next_occurrence(now).expect("child expected");
        assert_eq!(child.parent_recurring_id, Some(7));
        assert_eq!(child.command, root.command);
        assert_eq!(child.recurring_interval_seconds, Some(300));
        assert_eq!(child.trigger_time, now + chrono::Duration::seconds(300));

        // A spawned occurrence keeps pointing at the original root.
        let mut grandchild_src = root.clone();
        grandchild_src.id = 42;
        grandchild_src.parent_recurring_id = Some(7);
        let grandchild = grandchild_src.next_occurrence(now).unwrap();
        assert_eq!(grandchild.parent_recurring_id, Some(7));
    }

    #[test]
    fn next_occurrence_respects_series_deadline() {
        let now = Utc::now();
        let mut a = base_action();
        a.recurring_until = Some(now - chrono::Duration::seconds(1));
        assert!(a.next_occurrence(now).is_none());

        a.recurring_until = Some(now + chrono::Duration::minutes(10));
        assert!(a.next_occurrence(now).is_some());
    }

    #[test]
    fn next_occurrence_none_for_one_off() {
        let now = Utc::now();
        let mut a = base_action();
        a.recurring = false;
        assert!(a.next_occurrence(now).is_none());
    }

    #[test]
    fn status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::Scheduled).unwrap(),
            "\"scheduled\""
        );
        assert_eq!(
            serde_json::to_string(&CompletionMode::RetryUntilAcknowledged).unwrap(),
            "\"retry_until_acknowledged\""
        );
    }

    #[test]
    fn verdict_surrogates() {
        let cam = Verdict::camera_failure();
        assert!(!cam.completed && cam.should_retry);
        assert_eq!(cam.retry_delay_seconds, 10);

        let llm = Verdict::oracle_failure("boom");
        assert!(!llm.completed && llm.should_retry);
        assert_eq!(llm.retry_delay_seconds, 60);
    }

    #[test]
    fn robot_response_defaults_missing_fields() {
        // Schema parsing must tolerate a minimal reply.
        let r: RobotResponse = serde_json::from_str(r#"{"vr": "hello"}"#).unwrap();
        assert_eq!(r.vr, "hello");
        assert!(r.act.is_empty());
        assert!(!r.fu);
    }
}
