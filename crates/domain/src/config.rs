//! Configuration tree.
//!
//! Deserialized from `config.toml`. Every section has serde defaults so an
//! empty file is a working configuration. Secrets are never stored here —
//! each section names the environment variable that carries its key.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
}

/// Severity of a configuration issue found by [`Config::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Check the configuration for inconsistencies. Errors abort startup;
    /// warnings are logged and the daemon proceeds degraded.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message,
            })
        };

        if self.scheduler.check_interval_secs == 0 {
            error("scheduler.check_interval_secs must be > 0".into());
        }
        if self.hardware.microstep == 0 || self.hardware.full_steps_per_rev == 0 {
            error("hardware.microstep and hardware.full_steps_per_rev must be > 0".into());
        }
        if self.hardware.max_servo_delta == 0 || self.hardware.max_servo_delta > 100 {
            error("hardware.max_servo_delta must be in 1..=100".into());
        }
        if self.dialogue.history_max_turns == 0 {
            error("dialogue.history_max_turns must be > 0".into());
        }
        if self.tasks.enabled && self.tasks.poll_interval_minutes == 0 {
            error("tasks.poll_interval_minutes must be > 0 when tasks are enabled".into());
        }

        if std::env::var(&self.llm.api_key_env).is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "LLM key env var {} is not set — all model calls will fail",
                    self.llm.api_key_env
                ),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding the action store and caches.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Directory holding the system prompt files.
    #[serde(default = "d_prompt_path")]
    pub prompt_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            prompt_path: d_prompt_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Env var carrying the API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_60000")]
    pub timeout_ms: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            model: d_llm_model(),
            api_key_env: d_llm_key_env(),
            timeout_ms: 60_000,
            temperature: d_temperature(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice (TTS)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "d_tts_base_url")]
    pub base_url: String,
    #[serde(default = "d_tts_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_voice_id")]
    pub voice_id: String,
    #[serde(default = "d_tts_model")]
    pub model_id: String,
    /// Playback speed multiplier.
    #[serde(default = "d_speed")]
    pub speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_tts_base_url(),
            api_key_env: d_tts_key_env(),
            voice_id: d_voice_id(),
            model_id: d_tts_model(),
            speed: d_speed(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hardware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "d_serial_port")]
    pub port: String,
    #[serde(default = "d_baud")]
    pub baud: u32,
    /// Servo channel driving elevation.
    #[serde(default = "d_8u8")]
    pub elevation_channel: u8,
    /// Servo channel driving translation.
    #[serde(default)]
    pub translation_channel: u8,
    /// Max absolute servo change per command, to prevent voltage dip.
    #[serde(default = "d_20u8")]
    pub max_servo_delta: u8,
    /// A4988 MS1/MS2/MS3 microstep setting.
    #[serde(default = "d_8u32")]
    pub microstep: u32,
    /// Full steps per revolution of the stepper (typical NEMA17: 200).
    #[serde(default = "d_200")]
    pub full_steps_per_rev: u32,
    /// Depth of the motion-sequence queue.
    #[serde(default = "d_32")]
    pub queue_depth: usize,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            port: d_serial_port(),
            baud: d_baud(),
            elevation_channel: 8,
            translation_channel: 0,
            max_servo_delta: 20,
            microstep: 8,
            full_steps_per_rev: 200,
            queue_depth: 32,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between engine ticks.
    #[serde(default = "d_10")]
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External task service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_tasks_base_url")]
    pub base_url: String,
    #[serde(default = "d_tasks_auth_url")]
    pub auth_base_url: String,
    #[serde(default = "d_tasks_id_env")]
    pub client_id_env: String,
    #[serde(default = "d_tasks_secret_env")]
    pub client_secret_env: String,
    #[serde(default = "d_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "d_scopes")]
    pub scopes: String,
    /// Minutes between proactive due-task polls.
    #[serde(default = "d_30")]
    pub poll_interval_minutes: u64,
    /// Timeout for a single sub-agent `ask`.
    #[serde(default = "d_30")]
    pub ask_timeout_secs: u64,
    /// Max LLM/tool rounds inside one `ask`.
    #[serde(default = "d_5")]
    pub max_tool_rounds: u32,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: d_tasks_base_url(),
            auth_base_url: d_tasks_auth_url(),
            client_id_env: d_tasks_id_env(),
            client_secret_env: d_tasks_secret_env(),
            redirect_uri: d_redirect_uri(),
            scopes: d_scopes(),
            poll_interval_minutes: 30,
            ask_timeout_secs: 30,
            max_tool_rounds: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_search_base_url")]
    pub base_url: String,
    #[serde(default = "d_search_model")]
    pub model: String,
    #[serde(default = "d_search_key_env")]
    pub api_key_env: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: d_search_base_url(),
            model: d_search_model(),
            api_key_env: d_search_key_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Words that terminate the outer loop.
    #[serde(default = "d_exit_words")]
    pub exit_words: Vec<String>,
    /// Max turns retained in conversation history.
    #[serde(default = "d_20usize")]
    pub history_max_turns: usize,
    /// Recent turns forwarded as auxiliary-classification context.
    #[serde(default = "d_4")]
    pub context_turns: usize,
    /// Degrees of face offset tolerated before centering stops.
    #[serde(default = "d_deadband")]
    pub center_deadband_deg: f32,
    /// Max centering iterations per wake.
    #[serde(default = "d_5usize")]
    pub max_center_steps: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            exit_words: d_exit_words(),
            history_max_turns: 20,
            context_turns: 4,
            center_deadband_deg: d_deadband(),
            max_center_steps: 5,
        }
    }
}

// ── Serde default helpers ──────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_prompt_path() -> PathBuf {
    PathBuf::from("./config/prompts")
}
fn d_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn d_llm_model() -> String {
    "gemini-3-flash-preview".into()
}
fn d_llm_key_env() -> String {
    "HA_LLM_API_KEY".into()
}
fn d_tts_base_url() -> String {
    "https://api.elevenlabs.io".into()
}
fn d_tts_key_env() -> String {
    "HA_TTS_API_KEY".into()
}
fn d_voice_id() -> String {
    "LcfcDJNUP1GQjkzn1xUU".into()
}
fn d_tts_model() -> String {
    "eleven_flash_v2".into()
}
fn d_serial_port() -> String {
    "/dev/ttyUSB0".into()
}
fn d_tasks_base_url() -> String {
    "https://api.ticktick.com/open/v1".into()
}
fn d_tasks_auth_url() -> String {
    "https://ticktick.com".into()
}
fn d_tasks_id_env() -> String {
    "HA_TASKS_CLIENT_ID".into()
}
fn d_tasks_secret_env() -> String {
    "HA_TASKS_CLIENT_SECRET".into()
}
fn d_redirect_uri() -> String {
    "http://localhost:8080/callback".into()
}
fn d_scopes() -> String {
    "tasks:read tasks:write".into()
}
fn d_search_base_url() -> String {
    "https://api.perplexity.ai".into()
}
fn d_search_model() -> String {
    "sonar".into()
}
fn d_search_key_env() -> String {
    "HA_SEARCH_API_KEY".into()
}
fn d_exit_words() -> Vec<String> {
    ["exit", "stop", "quit", "bye", "goodbye"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn d_baud() -> u32 {
    9600
}
fn d_temperature() -> f32 {
    0.7
}
fn d_speed() -> f32 {
    1.2
}
fn d_deadband() -> f32 {
    3.0
}
fn d_true() -> bool {
    true
}
fn d_4() -> usize {
    4
}
fn d_5() -> u32 {
    5
}
fn d_5usize() -> usize {
    5
}
fn d_8u8() -> u8 {
    8
}
fn d_8u32() -> u32 {
    8
}
fn d_10() -> u64 {
    10
}
fn d_20u8() -> u8 {
    20
}
fn d_20usize() -> usize {
    20
}
fn d_30() -> u64 {
    30
}
fn d_32() -> usize {
    32
}
fn d_200() -> u32 {
    200
}
fn d_60000() -> u64 {
    60_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_a_working_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.check_interval_secs, 10);
        assert_eq!(config.hardware.max_servo_delta, 20);
        assert_eq!(config.hardware.microstep, 8);
        assert_eq!(config.hardware.full_steps_per_rev, 200);
        assert_eq!(config.tasks.max_tool_rounds, 5);
        assert_eq!(config.dialogue.context_turns, 4);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            check_interval_secs = 3

            [hardware]
            port = "/dev/tty.usbmodem1101"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.check_interval_secs, 3);
        assert_eq!(config.hardware.port, "/dev/tty.usbmodem1101");
        assert_eq!(config.hardware.baud, 9600);
    }

    #[test]
    fn validate_flags_zero_interval() {
        let mut config = Config::default();
        config.scheduler.check_interval_secs = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.message.contains("check_interval_secs")));
    }

    #[test]
    fn validate_flags_bad_servo_delta() {
        let mut config = Config::default();
        config.hardware.max_servo_delta = 0;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn exit_words_default_set() {
        let config = Config::default();
        for w in ["exit", "stop", "quit", "bye", "goodbye"] {
            assert!(config.dialogue.exit_words.iter().any(|e| e == w));
        }
    }
}
