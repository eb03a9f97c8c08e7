//! Motion dispatch.
//!
//! Translates the model's numeric action tuples into typed motion steps and
//! drains them through a single-consumer bounded queue. Producers (dialogue,
//! engine, poller) enqueue without blocking; only the drain task touches the
//! serial link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use ha_domain::action::{ActionTuple, RobotState};

use crate::servo::ServoController;

/// Spacing between consecutive steps, for mechanical safety.
const INTER_STEP_DELAY: Duration = Duration::from_millis(100);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Motion steps & translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single decoded motion step.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionStep {
    SetTranslation(i32),
    SetElevation(i32),
    MoveLeft(f32),
    MoveRight(f32),
    MoveServo { channel: u8, value: i32 },
    Wait(f32),
}

/// Decode raw `[command_id, arg1, ...]` tuples into motion steps.
///
/// Command ids: 0 set_translation, 1 set_elevation, 2 move_left,
/// 3 move_right, 4 move_servo, 5 wait. Malformed tuples are logged and
/// skipped; they never abort the rest of the sequence.
pub fn translate_actions(tuples: &[ActionTuple]) -> Vec<MotionStep> {
    let mut steps = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        let Some(cmd) = tuple.first().and_then(|v| v.as_i64()) else {
            tracing::warn!(?tuple, "action tuple missing command id, skipping");
            continue;
        };
        let arg_i32 = |i: usize| tuple.get(i).and_then(|v| v.as_i64()).map(|v| v as i32);
        let arg_f32 = |i: usize| tuple.get(i).and_then(|v| v.as_f64()).map(|v| v as f32);

        let step = match cmd {
            0 => arg_i32(1).map(MotionStep::SetTranslation),
            1 => arg_i32(1).map(MotionStep::SetElevation),
            2 => arg_f32(1).map(MotionStep::MoveLeft),
            3 => arg_f32(1).map(MotionStep::MoveRight),
            4 => match (arg_i32(1), arg_i32(2)) {
                (Some(channel), Some(value)) if (0..=15).contains(&channel) => {
                    Some(MotionStep::MoveServo {
                        channel: channel as u8,
                        value,
                    })
                }
                _ => None,
            },
            5 => Some(MotionStep::Wait(arg_f32(1).unwrap_or(1.0))),
            other => {
                tracing::warn!(command = other, "unknown action command id, skipping");
                continue;
            }
        };
        match step {
            Some(step) => steps.push(step),
            None => tracing::warn!(?tuple, "malformed action tuple, skipping"),
        }
    }
    steps
}

/// The pre-speech gesture used by proactive reminders: raise, pause, settle.
pub fn attention_gesture() -> Vec<MotionStep> {
    vec![
        MotionStep::SetElevation(65),
        MotionStep::Wait(0.4),
        MotionStep::SetElevation(50),
        MotionStep::Wait(0.3),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MotionDispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle for enqueueing motion sequences.
///
/// Cloneable; all clones feed the same bounded queue. The drain task owns
/// the [`ServoController`] and executes sequences strictly in arrival order.
#[derive(Clone)]
pub struct MotionDispatcher {
    tx: mpsc::Sender<Vec<MotionStep>>,
    state: Arc<RwLock<RobotState>>,
}

impl MotionDispatcher {
    /// Spawn the drain task and return the enqueue handle.
    pub fn spawn(mut controller: ServoController, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<MotionStep>>(queue_depth);
        let state = Arc::new(RwLock::new(controller.state()));
        let shared_state = state.clone();

        tokio::spawn(async move {
            while let Some(sequence) = rx.recv().await {
                for step in sequence {
                    execute_step(&mut controller, &step).await;
                    *shared_state.write() = controller.state();
                    tokio::time::sleep(INTER_STEP_DELAY).await;
                }
            }
            tracing::debug!("motion dispatcher drain task exiting");
        });

        Self { tx, state }
    }

    /// Snapshot of the actuator state after the last executed step.
    pub fn robot_state(&self) -> RobotState {
        *self.state.read()
    }

    /// Enqueue a sequence without blocking. A full queue drops the sequence
    /// with a warning — producers must never stall on the hardware.
    pub fn enqueue(&self, sequence: Vec<MotionStep>) {
        if sequence.is_empty() {
            return;
        }
        if let Err(e) = self.tx.try_send(sequence) {
            tracing::warn!(error = %e, "motion queue full, dropping sequence");
        }
    }

    /// Translate and enqueue raw model tuples in one call.
    pub fn enqueue_tuples(&self, tuples: &[ActionTuple]) {
        self.enqueue(translate_actions(tuples));
    }
}

async fn execute_step(controller: &mut ServoController, step: &MotionStep) {
    let result = match *step {
        MotionStep::SetTranslation(value) => controller.set_translation(value),
        MotionStep::SetElevation(value) => controller.set_elevation(value),
        MotionStep::MoveLeft(deg) => controller.move_left(deg),
        MotionStep::MoveRight(deg) => controller.move_right(deg),
        MotionStep::MoveServo { channel, value } => controller.move_servo(channel, value),
        MotionStep::Wait(seconds) => {
            tokio::time::sleep(Duration::from_secs_f32(seconds.max(0.0))).await;
            Ok(true)
        }
    };
    // Hardware errors skip the step and leave state unchanged.
    if let Err(e) = result {
        tracing::warn!(error = %e, ?step, "motion step failed, skipping");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
