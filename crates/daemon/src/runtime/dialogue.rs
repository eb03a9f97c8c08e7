//! Dialogue loop.
//!
//! Wake word → aim the camera → capture speech → route the intent → respond
//! with voice and motion. Runs as one logical worker; everything blocking
//! (wake word, transcription, frame capture) is pushed onto the blocking
//! pool so the rest of the runtime keeps breathing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ha_domain::action::{Intent, RobotResponse};
use ha_domain::config::DialogueConfig;
use ha_domain::message::Message;
use ha_hardware::{MotionDispatcher, MotionStep};
use ha_providers::{ChatRequest, LlmClient};
use ha_senses::{CameraArbiter, FaceLocator, JpegFrame, Speaker, SpeechToText, WakeWordDetector};
use ha_store::ActionStore;
use ha_tasks::TaskAgent;

use super::history::ConversationHistory;
use super::intent::IntentRouter;

const FRAME_WIDTH: u32 = 224;
const FRAME_HEIGHT: u32 = 224;

/// Largest single centering rotation, degrees.
const MAX_CENTER_STEP_DEG: f32 = 20.0;

/// Pause between centering moves so the motion lands before re-checking.
const CENTER_SETTLE: Duration = Duration::from_millis(600);

fn robot_response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "vr": {"type": "string"},
            "act": {
                "type": "array",
                "items": {"type": "array", "items": {"type": "number"}},
            },
            "fu": {"type": "boolean"},
            "fp": {"type": "string"},
        },
        "required": ["vr", "act", "fu", "fp"],
    })
}

/// How long to wait before a deferred follow-up, based on how much motion
/// has to settle first.
fn settle_delay(act_len: usize) -> Duration {
    Duration::from_millis(2_000 + 600 * act_len as u64)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DialogueLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DialogueLoop {
    llm: Arc<dyn LlmClient>,
    router: IntentRouter,
    store: Arc<ActionStore>,
    task_agent: Option<Arc<TaskAgent>>,
    speaker: Arc<dyn Speaker>,
    dispatcher: MotionDispatcher,
    camera: CameraArbiter,
    wake: Arc<Mutex<Box<dyn WakeWordDetector>>>,
    stt: Arc<Mutex<Box<dyn SpeechToText>>>,
    face: Option<Arc<Mutex<Box<dyn FaceLocator>>>>,
    system_prompt: String,
    config: DialogueConfig,
    history: ConversationHistory,
    followup: Option<JoinHandle<()>>,
}

impl DialogueLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        router: IntentRouter,
        store: Arc<ActionStore>,
        task_agent: Option<Arc<TaskAgent>>,
        speaker: Arc<dyn Speaker>,
        dispatcher: MotionDispatcher,
        camera: CameraArbiter,
        wake: Box<dyn WakeWordDetector>,
        stt: Box<dyn SpeechToText>,
        face: Option<Box<dyn FaceLocator>>,
        system_prompt: String,
        config: DialogueConfig,
    ) -> Self {
        let history = ConversationHistory::new(config.history_max_turns);
        Self {
            llm,
            router,
            store,
            task_agent,
            speaker,
            dispatcher,
            camera,
            wake: Arc::new(Mutex::new(wake)),
            stt: Arc::new(Mutex::new(stt)),
            face: face.map(|f| Arc::new(Mutex::new(f))),
            system_prompt,
            config,
            history,
            followup: None,
        }
    }

    /// Worker loop. An exit word flips the shutdown channel for every other
    /// worker; ctrl-c arrives through the same channel.
    pub async fn run(
        &mut self,
        shutdown_tx: watch::Sender<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        tracing::info!("dialogue loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let wake = self.wake.clone();
            let woke = tokio::select! {
                result = tokio::task::spawn_blocking(move || wake.lock().wait_for_wake()) => result,
                _ = shutdown_rx.changed() => continue,
            };
            match woke {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "wake-word detection failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "wake task panicked");
                    continue;
                }
            }

            self.center_on_face().await;

            let stt = self.stt.clone();
            let transcript =
                match tokio::task::spawn_blocking(move || stt.lock().listen_and_transcribe()).await
                {
                    Ok(Ok(text)) => text.trim().to_string(),
                    Ok(Err(e)) => {
                        // Re-arm without consuming a turn.
                        tracing::warn!(error = %e, "transcription failed");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "transcription task panicked");
                        continue;
                    }
                };
            if transcript.is_empty() {
                continue;
            }
            tracing::info!(transcript = %transcript, "user turn");

            // Any new turn cancels a pending follow-up.
            self.cancel_followup();

            if self.router.is_exit(&transcript) {
                let _ = self.speaker.speak("Goodbye.").await;
                let _ = shutdown_tx.send(true);
                break;
            }

            self.handle_turn(&transcript).await;
        }
        tracing::info!("dialogue loop stopped");
    }

    async fn handle_turn(&mut self, transcript: &str) {
        let context = self.history.recent(self.config.context_turns);
        let intents = self.router.route(transcript, &context).await;

        let mut task_context = None;
        let mut search_context = None;
        for intent in intents {
            match intent {
                Intent::Schedule {
                    action,
                    confirmation,
                } => {
                    self.handle_schedule(transcript, action, confirmation).await;
                    return;
                }
                Intent::TaskService { context_text } => task_context = Some(context_text),
                Intent::Search { context_text } => search_context = Some(context_text),
                Intent::Plain => {}
            }
        }
        self.respond(transcript, task_context, search_context).await;
    }

    async fn handle_schedule(
        &mut self,
        transcript: &str,
        action: ha_domain::action::NewAction,
        confirmation: String,
    ) {
        let command = action.command.clone();
        let trigger_time = action.trigger_time;
        match self.store.insert(action).await {
            Ok(id) => {
                tracing::info!(action_id = id, command = %command, "action scheduled");
                // Best-effort mirror into the external task service; never
                // blocks the confirmation.
                if let Some(agent) = &self.task_agent {
                    let agent = agent.clone();
                    let instruction = format!(
                        "Create a task to track this scheduled reminder: \"{command}\" \
                         due {trigger_time}. If a matching task already exists, do nothing."
                    );
                    tokio::spawn(async move {
                        let _ = agent.ask_bounded(&instruction).await;
                    });
                }
                if let Err(e) = self.speaker.speak(&confirmation).await {
                    tracing::warn!(error = %e, "confirmation speech failed");
                }
                self.history.push_user(transcript);
                self.history.push_assistant(&confirmation);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to persist scheduled action");
                let _ = self
                    .speaker
                    .speak("Sorry, I couldn't save that reminder.")
                    .await;
            }
        }
    }

    /// Non-scheduling turn: main model call with frame, state, and whatever
    /// auxiliary context the gates produced.
    async fn respond(
        &mut self,
        transcript: &str,
        task_context: Option<String>,
        search_context: Option<String>,
    ) {
        let frame = self.capture_frame().await;
        if frame.is_none() {
            let _ = self
                .speaker
                .speak("Sorry, give me a second, my eyes are busy.")
                .await;
        }

        let state = self.dispatcher.robot_state();
        let mut system = format!(
            "{}\n\nROBOT STATE: {}",
            self.system_prompt,
            serde_json::to_string(&state).unwrap_or_default(),
        );
        if let Some(task) = &task_context {
            system.push_str(&format!("\n\nTASK CONTEXT:\n{task}"));
        }
        if let Some(search) = &search_context {
            system.push_str(&format!("\n\nSEARCH CONTEXT:\n{search}"));
        }

        let mut messages = vec![Message::system(system)];
        for turn in self.history.recent(self.config.history_max_turns) {
            match turn.strip_prefix("assistant: ") {
                Some(text) => messages.push(Message::model(text)),
                None => messages.push(Message::user(
                    turn.strip_prefix("user: ").unwrap_or(&turn),
                )),
            }
        }
        messages.push(match &frame {
            Some(frame) => Message::user_with_frame(transcript, frame.to_base64()),
            None => Message::user(transcript),
        });

        let request = ChatRequest {
            messages,
            response_schema: Some(robot_response_schema()),
            ..Default::default()
        };
        let reply = match self.llm.generate(request).await {
            Ok(resp) => resp.content,
            Err(e) => {
                tracing::warn!(error = %e, "dialogue model call failed");
                let _ = self
                    .speaker
                    .speak("Sorry, I'm having trouble thinking right now.")
                    .await;
                return;
            }
        };

        let response: RobotResponse = match serde_json::from_str(&reply) {
            Ok(response) => response,
            Err(_) => {
                // Best effort: speak the raw text rather than drop the turn.
                tracing::warn!("dialogue reply did not match schema, speaking raw text");
                RobotResponse {
                    vr: reply,
                    act: Vec::new(),
                    fu: false,
                    fp: String::new(),
                }
            }
        };

        if !response.act.is_empty() {
            self.dispatcher.enqueue_tuples(&response.act);
        }
        if !response.vr.is_empty() {
            if let Err(e) = self.speaker.speak(&response.vr).await {
                tracing::warn!(error = %e, "response speech failed");
            }
        }
        self.history.push_user(transcript);
        self.history.push_assistant(&response.vr);

        if response.fu && !response.fp.trim().is_empty() {
            self.schedule_followup(response.fp.clone(), settle_delay(response.act.len()));
        }
    }

    async fn capture_frame(&self) -> Option<JpegFrame> {
        let camera = self.camera.clone();
        match tokio::task::spawn_blocking(move || camera.try_capture(FRAME_WIDTH, FRAME_HEIGHT))
            .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "frame capture failed");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "capture task panicked");
                None
            }
        }
    }

    /// Bounded horizontal centering on the nearest face before listening.
    async fn center_on_face(&self) {
        let Some(face) = &self.face else { return };
        for _ in 0..self.config.max_center_steps {
            let Some(frame) = self.capture_frame().await else { break };
            let offset = {
                let mut locator = face.lock();
                match locator.face_offset_deg(&frame) {
                    Ok(Some(offset)) => offset,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "face detection failed");
                        break;
                    }
                }
            };
            if offset.abs() <= self.config.center_deadband_deg {
                break;
            }
            let magnitude = offset.abs().min(MAX_CENTER_STEP_DEG);
            let step = if offset > 0.0 {
                MotionStep::MoveRight(magnitude)
            } else {
                MotionStep::MoveLeft(magnitude)
            };
            self.dispatcher.enqueue(vec![step]);
            tokio::time::sleep(CENTER_SETTLE).await;
        }
    }

    /// Deferred re-prompt once the motion settles; the next user turn
    /// cancels it.
    fn schedule_followup(&mut self, prompt: String, delay: Duration) {
        self.cancel_followup();
        let llm = self.llm.clone();
        let speaker = self.speaker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let request = ChatRequest::text(prompt).with_max_tokens(200);
            match llm.generate(request).await {
                Ok(resp) => {
                    let _ = speaker.speak(&resp.content).await;
                }
                Err(e) => tracing::debug!(error = %e, "follow-up call failed"),
            }
        });
        self.followup = Some(handle);
    }

    fn cancel_followup(&mut self) {
        if let Some(handle) = self.followup.take() {
            handle.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ha_domain::config::HardwareConfig;
    use ha_domain::error::Result;
    use ha_hardware::{RecordingSink, ServoController};
    use ha_providers::ChatResponse;
    use ha_senses::Camera;

    struct ConstantLlm(String);
    #[async_trait]
    impl LlmClient for ConstantLlm {
        async fn generate(&self, _req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: self.0.clone(),
                model: "fake".into(),
            })
        }
        fn client_id(&self) -> &str {
            "fake"
        }
    }

    struct RecordingSpeaker {
        spoken: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn speak(&self, text: &str) -> Result<()> {
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    struct StaticCamera;
    impl Camera for StaticCamera {
        fn capture_jpeg(&mut self, _w: u32, _h: u32) -> Result<JpegFrame> {
            Ok(JpegFrame { bytes: vec![0xFF] })
        }
    }

    struct NeverWake;
    impl WakeWordDetector for NeverWake {
        fn wait_for_wake(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct NoStt;
    impl SpeechToText for NoStt {
        fn listen_and_transcribe(&mut self) -> Result<String> {
            Ok(String::new())
        }
    }

    fn dialogue_with_llm(reply: &str) -> (DialogueLoop, Arc<Mutex<Vec<String>>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ActionStore::new(dir.path()).unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(ConstantLlm(reply.to_string()));
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let speaker: Arc<dyn Speaker> = Arc::new(RecordingSpeaker {
            spoken: spoken.clone(),
        });
        let controller =
            ServoController::new(Box::new(RecordingSink::new()), &HardwareConfig::default());
        let dispatcher = MotionDispatcher::spawn(controller, 8);
        let router = IntentRouter::new(llm.clone(), vec!["exit".into()], None, None);

        let dialogue = DialogueLoop::new(
            llm,
            router,
            store,
            None,
            speaker,
            dispatcher,
            CameraArbiter::new(Box::new(StaticCamera)),
            Box::new(NeverWake),
            Box::new(NoStt),
            None,
            "You are a helpful desk robot.".into(),
            DialogueConfig::default(),
        );
        (dialogue, spoken, dir)
    }

    #[test]
    fn settle_delay_scales_with_motion() {
        assert_eq!(settle_delay(0), Duration::from_millis(2_000));
        assert_eq!(settle_delay(5), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn respond_speaks_structured_reply_and_keeps_history() {
        let reply = serde_json::json!({
            "vr": "Hello there!",
            "act": [[1, 55]],
            "fu": false,
            "fp": "",
        })
        .to_string();
        let (mut dialogue, spoken, _dir) = dialogue_with_llm(&reply);

        dialogue.respond("hi robot", None, None).await;

        assert_eq!(spoken.lock().as_slice(), ["Hello there!"]);
        let recent = dialogue.history.recent(4);
        assert_eq!(recent, vec!["user: hi robot", "assistant: Hello there!"]);
    }

    #[tokio::test]
    async fn respond_speaks_raw_text_when_schema_fails() {
        let (mut dialogue, spoken, _dir) = dialogue_with_llm("just plain prose");
        dialogue.respond("hi", None, None).await;
        assert_eq!(spoken.lock().as_slice(), ["just plain prose"]);
    }

    #[tokio::test]
    async fn followup_is_cancellable() {
        let reply = serde_json::json!({
            "vr": "Working on it.",
            "act": [],
            "fu": true,
            "fp": "Report how the task went.",
        })
        .to_string();
        let (mut dialogue, spoken, _dir) = dialogue_with_llm(&reply);

        dialogue.respond("do the thing", None, None).await;
        assert!(dialogue.followup.is_some(), "follow-up timer must be armed");

        // The next turn cancels it before it fires.
        dialogue.cancel_followup();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(spoken.lock().len(), 1, "only the direct reply is spoken");
    }
}
