//! Intent router.
//!
//! Classifies each user turn into scheduling, task-service, search, or
//! plain conversation. Scheduling wins outright; otherwise the task and
//! search gates are evaluated independently and both may contribute
//! auxiliary context to the main model call.
//!
//! The bias is deliberately conservative: classification errors, malformed
//! model output, and ambiguous phrasing all resolve to "not a schedule".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use ha_domain::action::{CompletionMode, Intent, NewAction};
use ha_providers::{ChatRequest, LlmClient};
use ha_search::{QueryComplexityCache, SearchClient};
use ha_tasks::TaskAgent;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduling verdict (model output)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The model's parse of a possible scheduling request.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingVerdict {
    pub should_schedule: bool,
    #[serde(default)]
    pub command: String,
    /// Local wall-clock, `YYYY-MM-DD HH:MM:SS`.
    #[serde(default)]
    pub trigger_time: String,
    #[serde(default)]
    pub completion_mode: String,
    #[serde(default)]
    pub retry_until: Option<String>,
    #[serde(default)]
    pub confirmation_message: String,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurring_interval_seconds: Option<u64>,
    #[serde(default)]
    pub recurring_until: Option<String>,
}

fn scheduling_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "should_schedule": {"type": "boolean"},
            "command": {"type": "string"},
            "trigger_time": {"type": "string"},
            "completion_mode": {
                "type": "string",
                "enum": ["one_shot", "retry_until_acknowledged", "retry_with_condition"],
            },
            "retry_until": {"type": "string", "nullable": true},
            "confirmation_message": {"type": "string"},
            "recurring": {"type": "boolean"},
            "recurring_interval_seconds": {"type": "integer", "nullable": true},
            "recurring_until": {"type": "string", "nullable": true},
        },
        "required": [
            "should_schedule", "command", "trigger_time",
            "completion_mode", "confirmation_message", "recurring",
        ],
    })
}

fn scheduling_prompt(transcript: &str, now: DateTime<Local>) -> String {
    format!(
        "Analyze this user request and determine if it's a scheduling request.\n\n\
         Current date/time: {now} ({weekday})\n\n\
         User said: \"{transcript}\"\n\n\
         BE EXTREMELY STRICT — default to NOT scheduling.\n\n\
         INFORMATION QUESTIONS (not scheduling — the user wants an answer NOW):\n\
         - \"When is [event]?\" / \"What time is [event]?\" / \"When does [thing] happen?\"\n\
         - \"What is [thing]?\" / \"Tell me about [thing]\" / \"How's [thing]?\"\n\
         - \"tell me when [event] is\" (asking for info, NOT scheduling)\n\n\
         SCHEDULING REQUESTS (do something at a FUTURE time) must contain one of:\n\
         - \"remind me\" / \"wake me up\"\n\
         - \"tell me when it's [specific clock time]\"\n\
         - \"check [thing] at [time]\"\n\
         - \"[action] at [specific time]\" / \"[action] in [duration]\"\n\
         - \"[action] every [interval]\" (recurring)\n\n\
         Questions starting with When/What/Where/How/Who/Why are never scheduling.\n\n\
         If scheduling, decide:\n\
         - command: the instruction to execute later\n\
         - trigger_time: local time, format {format} (future; \"wake me at 7am\" said \
           in the evening means tomorrow 07:00:00)\n\
         - completion_mode: one_shot for plain reminders; retry_until_acknowledged to \
           keep trying until the user responds; retry_with_condition to keep trying \
           until the scene shows the condition met (waking up, leaving the phone)\n\
         - retry_until: optional deadline to stop retrying, same format\n\
         - confirmation_message: one friendly sentence confirming the schedule\n\
         - recurring + recurring_interval_seconds (+ optional recurring_until) for \
           \"every N minutes/hours\" requests; the first trigger_time is one interval \
           from now.\n\
         If NOT scheduling, set should_schedule=false and leave the rest empty.",
        now = now.format(TIME_FORMAT),
        weekday = now.format("%A"),
        format = "YYYY-MM-DD HH:MM:SS",
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict → NewAction resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_local(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), TIME_FORMAT).ok()?;
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        chrono::LocalResult::None => None,
    }
}

fn parse_mode(raw: &str) -> CompletionMode {
    match raw {
        "retry_until_acknowledged" => CompletionMode::RetryUntilAcknowledged,
        "retry_with_condition" => CompletionMode::RetryWithCondition,
        _ => CompletionMode::OneShot,
    }
}

/// Turn a model verdict into an insertable action, enforcing the invariants
/// the model cannot be trusted with.
///
/// - A past trigger time is bumped forward a day at a time until it is in
///   the future; the deadlines move with it.
/// - `retry_until`, when set, never precedes the trigger time.
/// - `recurring` without a positive interval degrades to a one-off.
///
/// Returns `None` (no intent) for anything unparseable.
pub fn resolve_schedule(
    verdict: &SchedulingVerdict,
    transcript: &str,
    now: DateTime<Utc>,
) -> Option<(NewAction, String)> {
    if !verdict.should_schedule || verdict.command.trim().is_empty() {
        return None;
    }
    let mut trigger_time = parse_local(&verdict.trigger_time)?;
    let mut retry_until = verdict.retry_until.as_deref().and_then(parse_local);
    let mut recurring_until = verdict.recurring_until.as_deref().and_then(parse_local);

    // Past times roll to the next day (the model heard "7am" at 8pm).
    let mut bumped = Duration::zero();
    while trigger_time < now {
        trigger_time += Duration::days(1);
        bumped += Duration::days(1);
    }
    if !bumped.is_zero() {
        retry_until = retry_until.map(|t| t + bumped);
        recurring_until = recurring_until.map(|t| t + bumped);
    }
    if let Some(deadline) = retry_until {
        if deadline < trigger_time {
            retry_until = Some(trigger_time);
        }
    }

    let recurring = verdict.recurring
        && verdict
            .recurring_interval_seconds
            .map(|i| i > 0)
            .unwrap_or(false);

    let mut context = HashMap::new();
    context.insert("transcript".to_string(), Value::String(transcript.to_string()));

    let action = NewAction {
        command: verdict.command.clone(),
        trigger_time,
        completion_mode: parse_mode(&verdict.completion_mode),
        retry_until,
        context,
        recurring,
        recurring_interval_seconds: if recurring {
            verdict.recurring_interval_seconds
        } else {
            None
        },
        recurring_until: if recurring { recurring_until } else { None },
        parent_recurring_id: None,
    };
    let confirmation = if verdict.confirmation_message.trim().is_empty() {
        format!("Okay, scheduled: {}", verdict.command)
    } else {
        verdict.confirmation_message.clone()
    };
    Some((action, confirmation))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IntentRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Search-gate collaborators, present only when search is configured.
pub struct SearchGate {
    pub client: Arc<SearchClient>,
    pub cache: Arc<QueryComplexityCache>,
}

pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    exit_words: Vec<String>,
    task_agent: Option<Arc<TaskAgent>>,
    search: Option<SearchGate>,
}

impl IntentRouter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        exit_words: Vec<String>,
        task_agent: Option<Arc<TaskAgent>>,
        search: Option<SearchGate>,
    ) -> Self {
        Self {
            llm,
            exit_words,
            task_agent,
            search,
        }
    }

    /// Whether the utterance contains a configured stop word.
    pub fn is_exit(&self, utterance: &str) -> bool {
        let lowered = utterance.to_lowercase();
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| self.exit_words.iter().any(|exit| exit == word))
    }

    /// Classify one turn. Scheduling short-circuits; otherwise the task and
    /// search gates each may add an auxiliary intent. An empty gate result
    /// is a plain turn.
    pub async fn route(&self, utterance: &str, history: &[String]) -> Vec<Intent> {
        if let Some((action, confirmation)) = self.classify_schedule(utterance, Utc::now()).await {
            return vec![Intent::Schedule {
                action,
                confirmation,
            }];
        }

        let mut intents = Vec::new();
        if let Some(agent) = &self.task_agent {
            let (handled, context_text) = agent.validate_task_need(utterance, history).await;
            if handled {
                intents.push(Intent::TaskService { context_text });
            }
        }
        if let Some(gate) = &self.search {
            let (needed, answer) = ha_search::search::validate_search_need(
                &self.llm,
                &gate.client,
                &gate.cache,
                utterance,
                history,
            )
            .await;
            if needed {
                if let Some(context_text) = answer {
                    intents.push(Intent::Search { context_text });
                }
            }
        }
        if intents.is_empty() {
            intents.push(Intent::Plain);
        }
        intents
    }

    /// Run the strict scheduling classification. Every failure mode — model
    /// error, schema mismatch, unparseable time — is "not a schedule".
    pub async fn classify_schedule(
        &self,
        utterance: &str,
        now: DateTime<Utc>,
    ) -> Option<(NewAction, String)> {
        let request = ChatRequest::text(scheduling_prompt(
            utterance,
            now.with_timezone(&Local),
        ))
        .with_temperature(0.0)
        .with_schema(scheduling_schema());

        let reply = match self.llm.generate(request).await {
            Ok(resp) => resp.content,
            Err(e) => {
                tracing::warn!(error = %e, "scheduling classification failed");
                return None;
            }
        };
        let verdict: SchedulingVerdict = match serde_json::from_str(&reply) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "scheduling verdict did not match schema");
                return None;
            }
        };
        resolve_schedule(&verdict, utterance, now)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
