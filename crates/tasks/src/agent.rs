//! The task sub-agent.
//!
//! Wraps the LLM in a bounded tool-calling loop against the task service.
//! Each round the model either emits a `{"tool": ..., "arguments": ...}`
//! object (executed and folded back into the conversation) or a final
//! plaintext answer for the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::Value;

use ha_domain::error::Result;
use ha_domain::message::Message;
use ha_providers::util::strip_code_fence;
use ha_providers::{ChatRequest, LlmClient};

/// Fast pre-filter: a turn without any of these never reaches the LLM gate.
pub const TASK_KEYWORDS: &[&str] = &[
    "task",
    "todo",
    "to-do",
    "to do",
    "remind",
    "reminder",
    "deadline",
    "due date",
    "due tomorrow",
    "complete",
    "finish",
    "check off",
    "mark done",
    "mark complete",
    "add to my list",
    "add to list",
    "create task",
    "new task",
    "delete task",
    "remove task",
    "my tasks",
    "my projects",
    "what do i have to do",
    "what's on my list",
    "what do i need to do",
    "project list",
    "inbox",
];

/// Canonical reply when an `ask` exceeds its deadline.
pub const ASK_TIMED_OUT: &str = "[task-agent] request timed out";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool executor seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes named tools against the external service.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool: &str, args: &Value) -> Result<String>;

    /// Text block describing the tool surface, rendered into the prompt.
    fn describe_tools(&self) -> String;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskAgent {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolExecutor>,
    max_tool_rounds: u32,
    ask_timeout: Duration,
}

impl TaskAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolExecutor>,
        max_tool_rounds: u32,
        ask_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            tools,
            max_tool_rounds,
            ask_timeout,
        }
    }

    /// System prompt with the current date/time baked in, so the model can
    /// resolve "today", "tomorrow", "next Monday".
    fn system_prompt() -> String {
        let now = Local::now();
        format!(
            "You are a task management sub-agent with access to task tools.\n\
             You receive instructions from a main agent or user about task management.\n\
             Execute the request using the available tools and return a clear, concise summary.\n\n\
             Current date and time: {}\n\n\
             IMPORTANT RULES:\n\
             - When calling a tool, respond ONLY with a JSON object (no markdown, no extra text):\n\
             \x20 {{\"tool\": \"<tool_name>\", \"arguments\": {{<arguments>}}}}\n\
             - If you need to show results or talk, respond with plain text (no JSON).\n\
             - After receiving tool results, summarize them clearly and concisely.\n\
             - For operations that need a project_id you don't have, first call get_projects.\n\
             - When creating tasks with due dates, use ISO 8601 format\n\
             \x20 (e.g. 2026-02-20T09:00:00+0000), resolving relative dates from the current time above.\n\
             - Keep responses brief — you're reporting back to another agent.",
            now.format("%A, %B %d, %Y at %I:%M %p")
        )
    }

    /// Run the tool-calling loop for one instruction.
    pub async fn ask(&self, instruction: &str) -> Result<String> {
        let mut conversation = vec![
            Message::user(format!(
                "{}\n\n{}",
                Self::system_prompt(),
                self.tools.describe_tools()
            )),
            Message::model("Ready. What task operation do you need?"),
            Message::user(instruction),
        ];

        for round in 0..self.max_tool_rounds {
            let request = ChatRequest {
                messages: conversation.clone(),
                temperature: Some(0.2),
                max_tokens: Some(2048),
                ..Default::default()
            };
            let reply = self.llm.generate(request).await?.content;

            let Some((tool, args)) = parse_tool_call(&reply) else {
                return Ok(reply);
            };

            tracing::debug!(round, tool = %tool, "task agent tool call");
            let output = match self.tools.execute(&tool, &args).await {
                Ok(output) => output,
                Err(e) => format!("Tool error: {e}"),
            };

            conversation.push(Message::model(reply));
            conversation.push(Message::user(format!(
                "Tool result from {tool}:\n{output}"
            )));
        }

        Ok("(task agent reached max tool rounds without a final answer)".into())
    }

    /// [`Self::ask`] bounded by the configured timeout. Never errors: LLM
    /// failures and timeouts both collapse to a canonical text the caller
    /// can fold into its prompt or skip.
    pub async fn ask_bounded(&self, instruction: &str) -> String {
        match tokio::time::timeout(self.ask_timeout, self.ask(instruction)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "task agent ask failed");
                format!("[task-agent] error: {e}")
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.ask_timeout, "task agent ask timed out");
                ASK_TIMED_OUT.into()
            }
        }
    }

    /// Decide whether a user turn is a task-management request, and if so
    /// handle it. Returns `(true, result_text)` when handled.
    pub async fn validate_task_need(
        &self,
        query: &str,
        conversation_context: &[String],
    ) -> (bool, String) {
        // 1. Keyword pre-filter — no LLM call for clearly unrelated turns.
        let query_lower = query.to_lowercase();
        if !TASK_KEYWORDS.iter().any(|kw| query_lower.contains(kw)) {
            return (false, String::new());
        }

        // 2. Confirm with a quick yes/no call.
        let context_block = if conversation_context.is_empty() {
            String::new()
        } else {
            let recent = conversation_context
                .iter()
                .rev()
                .take(2)
                .rev()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            format!("Recent conversation:\n{recent}\n\n")
        };
        let prompt = format!(
            "{context_block}User said: \"{query}\"\n\n\
             Is this a task management request (creating, viewing, completing, \
             deleting, or modifying tasks/to-dos)? Answer ONLY 'Yes' or 'No'."
        );

        let request = ChatRequest::text(prompt)
            .with_temperature(0.0)
            .with_max_tokens(10);
        let is_task = match self.llm.generate(request).await {
            Ok(resp) => resp.content.contains("Yes"),
            Err(e) => {
                // Conservative default: not a task request.
                tracing::warn!(error = %e, "task-need validation failed");
                false
            }
        };
        if !is_task {
            return (false, String::new());
        }

        let instruction = if context_block.is_empty() {
            query.to_string()
        } else {
            format!("{context_block}User request: {query}")
        };
        let result = self.ask_bounded(&instruction).await;
        (true, result)
    }
}

/// Parse a reply as a tool call if it is one.
///
/// Accepts fence-wrapped JSON; anything that is not an object with a string
/// `tool` key is treated as a final answer.
fn parse_tool_call(reply: &str) -> Option<(String, Value)> {
    let cleaned = strip_code_fence(reply);
    let parsed: Value = serde_json::from_str(cleaned).ok()?;
    let tool = parsed.get("tool")?.as_str()?.to_string();
    let args = parsed
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some((tool, args))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
