//! System prompt files.
//!
//! Prompts live outside the binary so they can be tuned without a rebuild.
//! A missing file degrades to an empty prompt with a warning rather than
//! failing startup.

use std::path::Path;

/// Loaded prompt templates.
pub struct Prompts {
    /// Main dialogue system prompt.
    pub main_system: String,
    /// Template for the completion oracle.
    pub scheduled_action: String,
}

impl Prompts {
    pub fn load(prompt_path: &Path) -> Self {
        Self {
            main_system: read_prompt(prompt_path, "system_prompt.txt"),
            scheduled_action: read_prompt(prompt_path, "scheduled_action_system_prompt.txt"),
        }
    }
}

fn read_prompt(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "prompt file missing, proceeding with empty prompt"
            );
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_degrade_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Prompts::load(dir.path());
        assert!(prompts.main_system.is_empty());
        assert!(prompts.scheduled_action.is_empty());
    }

    #[test]
    fn present_files_are_loaded_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("system_prompt.txt"), "You are a robot.\n").unwrap();
        let prompts = Prompts::load(dir.path());
        assert_eq!(prompts.main_system, "You are a robot.");
        assert!(prompts.scheduled_action.is_empty());
    }
}
