//! Proactive task poller.
//!
//! Periodically asks the sub-agent for due or overdue tasks and interrupts
//! the user with a spoken reminder. Deduplicates by a fingerprint of the
//! answer so the same task list is never nagged about twice in a session.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::watch;

use ha_hardware::{attention_gesture, MotionDispatcher};
use ha_senses::Speaker;

use crate::agent::{TaskAgent, ASK_TIMED_OUT};

/// Delay before the first poll so the system finishes booting.
const STARTUP_DELAY: Duration = Duration::from_secs(30);

/// Answers that canonicalize to "nothing due".
const EMPTY_SENTINELS: &[&str] = &[
    "no tasks due",
    "no tasks",
    "no overdue",
    "nothing due",
    "none",
    "all clear",
];

/// Characters of the answer used as the dedup fingerprint.
const FINGERPRINT_LEN: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskPoller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskPoller {
    agent: std::sync::Arc<TaskAgent>,
    speaker: std::sync::Arc<dyn Speaker>,
    dispatcher: Option<MotionDispatcher>,
    interval: Duration,
    reminded: Mutex<HashSet<String>>,
}

impl TaskPoller {
    pub fn new(
        agent: std::sync::Arc<TaskAgent>,
        speaker: std::sync::Arc<dyn Speaker>,
        dispatcher: Option<MotionDispatcher>,
        poll_interval_minutes: u64,
    ) -> Self {
        Self {
            agent,
            speaker,
            dispatcher,
            interval: Duration::from_secs(poll_interval_minutes * 60),
            reminded: Mutex::new(HashSet::new()),
        }
    }

    /// Worker loop. Sleeps in one-second increments so shutdown never waits
    /// out a full poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_min = self.interval.as_secs() / 60,
            "task poller started"
        );
        if sleep_or_shutdown(STARTUP_DELAY, &mut shutdown).await {
            return;
        }

        loop {
            self.poll_once().await;
            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                tracing::info!("task poller stopped");
                return;
            }
        }
    }

    /// One poll: query, canonicalize, dedup, gesture, speak.
    pub async fn poll_once(&self) {
        let today = Local::now().format("%A, %B %d, %Y");
        let answer = self
            .agent
            .ask_bounded(&format!(
                "List all tasks that are due today ({today}) or overdue (past their \
                 due date). For each task include its title and due date/time. If \
                 there are no due or overdue tasks, respond with exactly: 'No tasks due.'"
            ))
            .await;

        if answer.is_empty() || answer == ASK_TIMED_OUT || answer.starts_with("[task-agent]") {
            return;
        }
        let lowered = answer.to_lowercase();
        if EMPTY_SENTINELS.iter().any(|s| lowered.contains(s)) {
            tracing::debug!("no tasks due");
            return;
        }

        let fingerprint: String = answer.trim().chars().take(FINGERPRINT_LEN).collect();
        {
            let mut reminded = self.reminded.lock();
            if !reminded.insert(fingerprint) {
                tracing::debug!("already reminded about this task list, skipping");
                return;
            }
        }

        tracing::info!("reminding about due tasks");
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.enqueue(attention_gesture());
        }
        let reminder = format!("Hey, quick reminder — {answer}");
        if let Err(e) = self.speaker.speak(&reminder).await {
            tracing::warn!(error = %e, "reminder speech failed");
        }
    }

    /// Reset the session dedup set (e.g. at day rollover).
    pub fn clear_reminded(&self) {
        self.reminded.lock().clear();
        tracing::info!("reminder cache cleared");
    }
}

/// Sleep for `total`, polling shutdown every second. Returns true on shutdown.
async fn sleep_or_shutdown(total: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let mut remaining = total;
    let step = Duration::from_secs(1);
    while !remaining.is_zero() {
        if *shutdown.borrow() {
            return true;
        }
        let chunk = remaining.min(step);
        tokio::select! {
            _ = tokio::time::sleep(chunk) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return true;
                }
            }
        }
        remaining = remaining.saturating_sub(chunk);
    }
    *shutdown.borrow()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ToolExecutor;
    use ha_domain::error::Result;
    use ha_providers::{ChatRequest, ChatResponse, LlmClient};
    use serde_json::Value;
    use std::sync::Arc;

    /// LLM fake that always replies with the same final text.
    struct ConstantLlm(String);

    #[async_trait::async_trait]
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

    struct NoTools;

    #[async_trait::async_trait]
    impl ToolExecutor for NoTools {
        async fn execute(&self, _tool: &str, _args: &Value) -> Result<String> {
            Ok(String::new())
        }
        fn describe_tools(&self) -> String {
            String::new()
        }
    }

    /// Speaker fake counting utterances.
    struct CountingSpeaker {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Speaker for CountingSpeaker {
        async fn speak(&self, text: &str) -> Result<()> {
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    fn poller_with_answer(answer: &str) -> (TaskPoller, Arc<CountingSpeaker>) {
        let agent = Arc::new(TaskAgent::new(
            Arc::new(ConstantLlm(answer.to_string())),
            Arc::new(NoTools),
            5,
            Duration::from_secs(5),
        ));
        let speaker = Arc::new(CountingSpeaker {
            spoken: Mutex::new(Vec::new()),
        });
        (
            TaskPoller::new(agent, speaker.clone(), None, 30),
            speaker,
        )
    }

    #[tokio::test]
    async fn empty_sentinel_stays_silent() {
        let (poller, speaker) = poller_with_answer("No tasks due.");
        poller.poll_once().await;
        assert!(speaker.spoken.lock().is_empty());
    }

    #[tokio::test]
    async fn due_tasks_spoken_once_per_fingerprint() {
        let (poller, speaker) =
            poller_with_answer("Water the plants — due today at 5 PM.");
        poller.poll_once().await;
        poller.poll_once().await;
        poller.poll_once().await;

        let spoken = speaker.spoken.lock();
        assert_eq!(spoken.len(), 1, "identical answers must be deduplicated");
        assert!(spoken[0].starts_with("Hey, quick reminder —"));
    }

    #[tokio::test]
    async fn clear_reminded_allows_repeat() {
        let (poller, speaker) = poller_with_answer("Pay rent — overdue since Monday.");
        poller.poll_once().await;
        poller.clear_reminded();
        poller.poll_once().await;
        assert_eq!(speaker.spoken.lock().len(), 2);
    }

    #[tokio::test]
    async fn agent_error_text_is_not_spoken() {
        let (poller, speaker) = poller_with_answer("");
        poller.poll_once().await;
        assert!(speaker.spoken.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_shutdown_observes_signal() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send(true).unwrap();
        assert!(handle.await.unwrap(), "shutdown must interrupt the sleep");
    }
}
