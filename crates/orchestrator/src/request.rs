//! What one turn asks of the providers.

use chorus_config::{ConsultMode, ConsultantConfig, HostConfig};
use serde::{Deserialize, Serialize};

/// A secondary model call made alongside the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultantSpec {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub mode: ConsultMode,
    /// How many prior messages the consultant sees
    pub history_window: usize,
    /// Delayed mode only: feed the output into the next turn's input
    pub inject_next_turn: bool,
}

impl ConsultantSpec {
    pub fn live(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            mode: ConsultMode::Live,
            history_window: 4,
            inject_next_turn: false,
        }
    }

    pub fn delayed(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            mode: ConsultMode::Delayed,
            ..Self::live(name, provider, model)
        }
    }

    pub fn injecting(mut self) -> Self {
        self.inject_next_turn = true;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }
}

impl From<&ConsultantConfig> for ConsultantSpec {
    fn from(config: &ConsultantConfig) -> Self {
        Self {
            name: config.name.clone(),
            provider: config.provider.clone(),
            model: config.model.clone(),
            mode: config.mode,
            history_window: config.history_window,
            inject_next_turn: config.inject_next_turn && config.mode == ConsultMode::Delayed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub primary_prompt: String,
    pub consultants: Vec<ConsultantSpec>,
}

impl OrchestrationRequest {
    pub fn new(primary_prompt: impl Into<String>) -> Self {
        Self {
            primary_prompt: primary_prompt.into(),
            consultants: Vec::new(),
        }
    }

    pub fn with_consultants(mut self, consultants: Vec<ConsultantSpec>) -> Self {
        self.consultants = consultants;
        self
    }

    /// The configured consultant set applied to `prompt`.
    pub fn from_config(config: &HostConfig, prompt: impl Into<String>) -> Self {
        Self::new(prompt).with_consultants(config.consultants.iter().map(ConsultantSpec::from).collect())
    }

    /// `(live, delayed)`, each in configured order.
    pub fn partition(&self) -> (Vec<&ConsultantSpec>, Vec<&ConsultantSpec>) {
        self.consultants
            .iter()
            .partition(|c| c.mode == ConsultMode::Live)
    }
}

/// The `[name/provider: output]` block a consultant contributes.
pub fn labeled_block(name: &str, provider: &str, output: &str) -> String {
    format!("[{name}/{provider}: {output}]")
}

/// Prepend `blocks` to `text`, separated by blank lines.
pub fn prepend_blocks(blocks: &[String], text: &str) -> String {
    if blocks.is_empty() {
        return text.to_string();
    }
    format!("{}\n\n{text}", blocks.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_configured_order() {
        let request = OrchestrationRequest::new("hi").with_consultants(vec![
            ConsultantSpec::delayed("d1", "p", "m"),
            ConsultantSpec::live("l1", "p", "m"),
            ConsultantSpec::delayed("d2", "p", "m"),
            ConsultantSpec::live("l2", "p", "m"),
        ]);
        let (live, delayed) = request.partition();
        let live: Vec<&str> = live.iter().map(|c| c.name.as_str()).collect();
        let delayed: Vec<&str> = delayed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(live, vec!["l1", "l2"]);
        assert_eq!(delayed, vec!["d1", "d2"]);
    }

    #[test]
    fn injection_is_dropped_for_live_consultants() {
        let config = ConsultantConfig {
            name: "critic".into(),
            provider: "openrouter".into(),
            model: "m".into(),
            mode: ConsultMode::Live,
            history_window: 2,
            inject_next_turn: true,
        };
        assert!(!ConsultantSpec::from(&config).inject_next_turn);
    }

    #[test]
    fn block_formatting() {
        assert_eq!(labeled_block("critic", "groq", "looks fine"), "[critic/groq: looks fine]");
        assert_eq!(prepend_blocks(&[], "hi"), "hi");
        assert_eq!(
            prepend_blocks(&["[a/p: 1]".into(), "[b/p: 2]".into()], "hi"),
            "[a/p: 1]\n[b/p: 2]\n\nhi"
        );
    }
}
