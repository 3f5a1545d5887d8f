//! Operator-facing progress output.
//!
//! Steps report progress through [`Ui`]; nothing they print affects control
//! flow.

use std::sync::Mutex;

use colored::Colorize;
use tracing::{error, info};

/// Progress sink used by every step.
pub trait Ui: Send + Sync {
    /// Announce a new phase.
    fn say(&self, message: &str);

    /// Detail within the current phase.
    fn message(&self, message: &str);

    fn error(&self, message: &str);
}

/// Colourised terminal output, prefixed with the build name.
#[derive(Debug, Clone)]
pub struct ConsoleUi {
    name: String,
}

impl ConsoleUi {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        info!(build = %self.name, "{message}");
        println!("{} {}", format!("==> {}:", self.name).green().bold(), message);
    }

    fn message(&self, message: &str) {
        info!(build = %self.name, "{message}");
        println!("    {} {}", format!("{}:", self.name).green(), message);
    }

    fn error(&self, message: &str) {
        error!(build = %self.name, "{message}");
        eprintln!("{} {}", format!("==> {}:", self.name).red().bold(), message.red());
    }
}

/// Which [`Ui`] method produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLevel {
    Say,
    Message,
    Error,
}

/// Records everything it is told.
#[derive(Debug, Default)]
pub struct MemoryUi {
    lines: Mutex<Vec<(UiLevel, String)>>,
}

impl MemoryUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(UiLevel, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Lines reported through [`Ui::error`].
    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(level, _)| *level == UiLevel::Error)
            .map(|(_, line)| line)
            .collect()
    }

    /// True when any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }

    fn push(&self, level: UiLevel, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

impl Ui for MemoryUi {
    fn say(&self, message: &str) {
        self.push(UiLevel::Say, message);
    }

    fn message(&self, message: &str) {
        self.push(UiLevel::Message, message);
    }

    fn error(&self, message: &str) {
        self.push(UiLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_ui_records_levels() {
        let ui = MemoryUi::new();
        ui.say("Creating VPC...");
        ui.message("VPC ID: net-1");
        ui.error("Error cleaning up subnet");

        assert_eq!(ui.lines().len(), 3);
        assert_eq!(ui.errors(), vec!["Error cleaning up subnet".to_string()]);
        assert!(ui.contains("net-1"));
        assert!(!ui.contains("srv-1"));
    }
}
