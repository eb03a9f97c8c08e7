//! Composition root.
//!
//! Builds every component from configuration, wires the fixed worker set
//! (dialogue loop, action engine, task poller, motion dispatcher), and runs
//! until an exit word or ctrl-c flips the shutdown channel.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use ha_domain::config::{Config, ConfigSeverity};
use ha_domain::error::{Error, Result as HaResult};
use ha_hardware::{MotionDispatcher, NullSink, SerialLink, ServoController};
use ha_providers::gemini::GeminiClient;
use ha_providers::LlmClient;
use ha_search::{QueryComplexityCache, SearchClient};
use ha_senses::{
    AudioPlayer, Camera, CameraArbiter, JpegFrame, Speaker, SpeechToText, StreamTts,
    WakeWordDetector,
};
use ha_store::ActionStore;
use ha_tasks::{OAuthSession, TaskAgent, TaskPoller, TaskServiceClient};

use crate::prompts::Prompts;
use crate::runtime::dialogue::DialogueLoop;
use crate::runtime::engine::ActionEngine;
use crate::runtime::intent::{IntentRouter, SearchGate};
use crate::runtime::oracle::CompletionOracle;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Console I/O (the built-in input backend)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Console input: the readline *is* the wake word, the typed line the
/// transcript. The native wake-word/STT backends plug in through the same
/// traits on robot builds.
struct ConsoleInput {
    editor: rustyline::DefaultEditor,
    pending: Option<String>,
}

impl ConsoleInput {
    fn new() -> HaResult<Self> {
        let editor = rustyline::DefaultEditor::new()
            .map_err(|e| Error::Other(format!("readline init: {e}")))?;
        Ok(Self {
            editor,
            pending: None,
        })
    }
}

impl WakeWordDetector for ConsoleInput {
    fn wait_for_wake(&mut self) -> HaResult<()> {
        match self.editor.readline("you> ") {
            Ok(line) => {
                self.pending = Some(line);
                Ok(())
            }
            Err(rustyline::error::ReadlineError::Eof)
            | Err(rustyline::error::ReadlineError::Interrupted) => {
                self.pending = Some("exit".into());
                Ok(())
            }
            Err(e) => Err(Error::Speech(format!("readline: {e}"))),
        }
    }
}

impl SpeechToText for ConsoleInput {
    fn listen_and_transcribe(&mut self) -> HaResult<String> {
        self.pending
            .take()
            .ok_or_else(|| Error::Speech("no pending console line".into()))
    }
}

/// Console input is shared between the wake and transcription seams.
#[derive(Clone)]
struct SharedConsole(Arc<parking_lot::Mutex<ConsoleInput>>);

impl WakeWordDetector for SharedConsole {
    fn wait_for_wake(&mut self) -> HaResult<()> {
        self.0.lock().wait_for_wake()
    }
}

impl SpeechToText for SharedConsole {
    fn listen_and_transcribe(&mut self) -> HaResult<String> {
        self.0.lock().listen_and_transcribe()
    }
}

/// Prints instead of speaking; the fallback when no TTS key is configured.
struct ConsoleSpeaker;

#[async_trait::async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> HaResult<()> {
        println!("robot> {text}");
        let _ = std::io::stdout().flush();
        Ok(())
    }
}

/// Pipes synthesized audio into an external player process.
struct CommandPlayer {
    program: String,
}

impl AudioPlayer for CommandPlayer {
    fn play(&self, audio: &[u8]) -> HaResult<()> {
        use std::process::{Command, Stdio};
        let mut child = Command::new(&self.program)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Speech(format!("spawning {}: {e}", self.program)))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(audio)
                .map_err(|e| Error::Speech(format!("writing audio: {e}")))?;
        }
        child
            .wait()
            .map_err(|e| Error::Speech(format!("player exit: {e}")))?;
        Ok(())
    }
}

/// No camera backend compiled in: every capture fails, which the engine and
/// dialogue already degrade around.
struct NoCamera;

impl Camera for NoCamera {
    fn capture_jpeg(&mut self, _width: u32, _height: u32) -> HaResult<JpegFrame> {
        Err(Error::Hardware("no camera backend configured".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured tracing; JSON when `HA_LOG_JSON=1`, human-readable otherwise.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ha_daemon=debug"));
    if std::env::var("HA_LOG_JSON").map(|v| v == "1").unwrap_or(false) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build everything and run until shutdown.
pub async fn run(config: Arc<Config>, text_mode: bool) -> anyhow::Result<()> {
    tracing::info!("HearthAgent starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Action store ─────────────────────────────────────────────────
    let store = Arc::new(
        ActionStore::new(&config.workspace.state_path).context("initializing action store")?,
    );
    tracing::info!("action store ready");

    // ── LLM client ───────────────────────────────────────────────────
    let llm: Arc<dyn LlmClient> = Arc::new(
        GeminiClient::from_config(&config.llm).context("initializing LLM client")?,
    );
    tracing::info!(model = %config.llm.model, "LLM client ready");

    // ── Hardware ─────────────────────────────────────────────────────
    let sink: Box<dyn ha_hardware::CommandSink> =
        match SerialLink::open(&config.hardware.port, config.hardware.baud) {
            Ok(link) => Box::new(link),
            Err(e) => {
                tracing::warn!(error = %e, "serial port unavailable, motion will be skipped");
                Box::new(NullSink)
            }
        };
    let controller = ServoController::new(sink, &config.hardware);
    let dispatcher = MotionDispatcher::spawn(controller, config.hardware.queue_depth);
    tracing::info!("motion dispatcher ready");

    // ── Camera ───────────────────────────────────────────────────────
    tracing::warn!("no camera backend configured — oracle verdicts will use retry surrogates");
    let camera = CameraArbiter::new(Box::new(NoCamera));

    // ── Voice output ─────────────────────────────────────────────────
    let speaker: Arc<dyn Speaker> = if text_mode {
        Arc::new(ConsoleSpeaker)
    } else {
        match StreamTts::from_config(
            &config.voice,
            Box::new(CommandPlayer {
                program: "mpg123".into(),
            }),
        ) {
            Ok(tts) => {
                tracing::info!(voice = %config.voice.voice_id, "TTS client ready");
                Arc::new(tts)
            }
            Err(e) => {
                tracing::warn!(error = %e, "TTS unavailable, printing responses instead");
                Arc::new(ConsoleSpeaker)
            }
        }
    };

    // ── Task sub-agent + poller ──────────────────────────────────────
    let task_agent = if config.tasks.enabled {
        match OAuthSession::from_config(&config.tasks) {
            Ok(auth) => {
                let client = Arc::new(
                    TaskServiceClient::new(&config.tasks, Arc::new(auth))
                        .context("initializing task-service client")?,
                );
                let agent = Arc::new(TaskAgent::new(
                    llm.clone(),
                    client,
                    config.tasks.max_tool_rounds,
                    std::time::Duration::from_secs(config.tasks.ask_timeout_secs),
                ));
                tracing::info!("task sub-agent ready");
                Some(agent)
            }
            Err(e) => {
                tracing::warn!(error = %e, "task service disabled (credentials missing)");
                None
            }
        }
    } else {
        None
    };

    // ── Search gate ──────────────────────────────────────────────────
    let search_gate = if config.search.enabled {
        match SearchClient::from_config(&config.search) {
            Ok(client) => {
                let cache = Arc::new(
                    QueryComplexityCache::new(&config.workspace.state_path)
                        .context("initializing complexity cache")?,
                );
                tracing::info!("search gate ready");
                Some(SearchGate {
                    client: Arc::new(client),
                    cache,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "search disabled (key missing)");
                None
            }
        }
    } else {
        None
    };

    // ── Prompts ──────────────────────────────────────────────────────
    let prompts = Prompts::load(&config.workspace.prompt_path);

    // ── Workers ──────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ctrl-c flips the same channel the exit word uses.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, shutting down");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let oracle = Arc::new(CompletionOracle::new(
        llm.clone(),
        camera.clone(),
        dispatcher.clone(),
        prompts.scheduled_action.clone(),
    ));
    let engine = ActionEngine::new(
        store.clone(),
        oracle,
        speaker.clone(),
        dispatcher.clone(),
        config.scheduler.check_interval_secs,
    );
    let engine_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { engine.run(rx).await })
    };

    let poller_handle = task_agent.as_ref().map(|agent| {
        let poller = TaskPoller::new(
            agent.clone(),
            speaker.clone(),
            Some(dispatcher.clone()),
            config.tasks.poll_interval_minutes,
        );
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { poller.run(rx).await })
    });

    if !text_mode {
        tracing::warn!(
            "no native audio input backend configured — running with console input \
             (pass --text to silence this warning)"
        );
    }
    let console = SharedConsole(Arc::new(parking_lot::Mutex::new(
        ConsoleInput::new().context("initializing console input")?,
    )));

    let router = IntentRouter::new(
        llm.clone(),
        config.dialogue.exit_words.clone(),
        task_agent.clone(),
        search_gate,
    );
    let mut dialogue = DialogueLoop::new(
        llm,
        router,
        store,
        task_agent,
        speaker,
        dispatcher,
        camera,
        Box::new(console.clone()),
        Box::new(console),
        None,
        prompts.main_system.clone(),
        config.dialogue.clone(),
    );

    // The dialogue loop is the foreground worker; the rest run alongside.
    dialogue.run(shutdown_tx.clone(), shutdown_rx.clone()).await;
    let _ = shutdown_tx.send(true);

    let _ = engine_handle.await;
    if let Some(handle) = poller_handle {
        let _ = handle.await;
    }
    tracing::info!("HearthAgent stopped");
    Ok(())
}
