//! Bounded conversation history.
//!
//! Process-local; only the dialogue loop mutates it. The most recent few
//! turns are forwarded as context for the auxiliary classifiers.

use std::collections::VecDeque;

/// One conversation turn, already labeled with its speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// Capacity-bounded turn buffer. The oldest turn falls off when full.
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Turn {
            speaker: Speaker::User,
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(Turn {
            speaker: Speaker::Assistant,
            text: text.into(),
        });
    }

    fn push(&mut self, turn: Turn) {
        if self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The most recent `n` turns, oldest first, rendered for prompt use.
    pub fn recent(&self, n: usize) -> Vec<String> {
        self.turns
            .iter()
            .rev()
            .take(n)
            .rev()
            .map(|turn| {
                let label = match turn.speaker {
                    Speaker::User => "user",
                    Speaker::Assistant => "assistant",
                };
                format!("{label}: {}", turn.text)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest() {
        let mut history = ConversationHistory::new(3);
        history.push_user("one");
        history.push_assistant("two");
        history.push_user("three");
        history.push_assistant("four");

        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent[0], "assistant: two");
        assert_eq!(recent[2], "assistant: four");
    }

    #[test]
    fn recent_takes_newest_in_order() {
        let mut history = ConversationHistory::new(10);
        for i in 0..6 {
            history.push_user(format!("u{i}"));
        }
        let recent = history.recent(2);
        assert_eq!(recent, vec!["user: u4", "user: u5"]);
    }

    #[test]
    fn recent_on_empty_is_empty() {
        let history = ConversationHistory::new(4);
        assert!(history.recent(4).is_empty());
        assert!(history.is_empty());
    }
}
