//! Completion oracle.
//!
//! Judges whether a scheduled action is done by showing the model the
//! command, the attempt count, the current actuator state, and one camera
//! frame. Judgement is the model's; the core only validates the schema.
//! Every failure maps to a surrogate retry verdict so the engine's state
//! machine never stalls on a broken camera or a flaky model.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use ha_domain::action::{ScheduledAction, Verdict};
use ha_domain::message::Message;
use ha_hardware::MotionDispatcher;
use ha_providers::{ChatRequest, LlmClient};
use ha_senses::CameraArbiter;

/// Frame size fed to the model.
const FRAME_WIDTH: u32 = 224;
const FRAME_HEIGHT: u32 = 224;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Judge seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The engine's view of the oracle. Infallible by contract: failures are
/// expressed as retry verdicts, never as errors.
#[async_trait]
pub trait CompletionJudge: Send + Sync {
    async fn judge(&self, action: &ScheduledAction, now: DateTime<Utc>) -> Verdict;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CompletionOracle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompletionOracle {
    llm: Arc<dyn LlmClient>,
    camera: CameraArbiter,
    dispatcher: MotionDispatcher,
    /// Static template loaded from the prompt directory (possibly empty).
    prompt_template: String,
}

impl CompletionOracle {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        camera: CameraArbiter,
        dispatcher: MotionDispatcher,
        prompt_template: String,
    ) -> Self {
        Self {
            llm,
            camera,
            dispatcher,
            prompt_template,
        }
    }

    fn verdict_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "vr": {"type": "string"},
                "act": {
                    "type": "array",
                    "items": {"type": "array", "items": {"type": "number"}},
                },
                "completed": {"type": "boolean"},
                "should_retry": {"type": "boolean"},
                "retry_delay_seconds": {"type": "integer"},
                "completion_reason": {"type": "string"},
            },
            "required": ["vr", "act", "completed", "should_retry",
                         "retry_delay_seconds", "completion_reason"],
        })
    }

    fn build_prompt(&self, action: &ScheduledAction) -> String {
        let state = self.dispatcher.robot_state();
        format!(
            "{template}\n\n\
             CURRENT EXECUTION DETAILS:\n\
             SCHEDULED COMMAND: \"{command}\"\n\
             COMPLETION MODE: {mode:?}\n\
             ATTEMPT NUMBER: {attempt}\n\
             ROBOT STATE: {state}\n\n\
             Execute this scheduled command now.",
            template = self.prompt_template,
            command = action.command,
            mode = action.completion_mode,
            attempt = action.attempt_count + 1,
            state = serde_json::to_string(&state).unwrap_or_default(),
        )
    }
}

#[async_trait]
impl CompletionJudge for CompletionOracle {
    async fn judge(&self, action: &ScheduledAction, _now: DateTime<Utc>) -> Verdict {
        // Frame capture is blocking I/O; keep it off the runtime threads.
        let camera = self.camera.clone();
        let frame = tokio::task::spawn_blocking(move || {
            camera.try_capture(FRAME_WIDTH, FRAME_HEIGHT)
        })
        .await;

        let frame = match frame {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::warn!(action_id = action.id, "camera busy, substituting retry verdict");
                return Verdict::camera_failure();
            }
            Ok(Err(e)) => {
                tracing::warn!(action_id = action.id, error = %e, "frame capture failed");
                return Verdict::camera_failure();
            }
            Err(e) => {
                tracing::warn!(action_id = action.id, error = %e, "capture task failed");
                return Verdict::camera_failure();
            }
        };

        let request = ChatRequest {
            messages: vec![Message::user_with_frame(
                self.build_prompt(action),
                frame.to_base64(),
            )],
            response_schema: Some(Self::verdict_schema()),
            ..Default::default()
        };

        let reply = match self.llm.generate(request).await {
            Ok(resp) => resp.content,
            Err(e) => {
                tracing::warn!(action_id = action.id, error = %e, "oracle model call failed");
                return Verdict::oracle_failure(&e.to_string());
            }
        };
        match serde_json::from_str::<Verdict>(&reply) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(action_id = action.id, error = %e, "oracle verdict did not match schema");
                Verdict::oracle_failure("schema mismatch")
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
