//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `insightflow.toml`. All fields have
//! defaults, so an empty file (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of finished executions kept in history (oldest evicted first).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Cumulative step time above which the synthesizer flags a workflow as slow.
    #[serde(default = "default_slow_workflow_threshold_ms")]
    pub slow_workflow_threshold_ms: u64,

    /// Optional per-step timeout. `None` means steps may run indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,

    /// Upper bound on insights produced by insight-generation steps and the synthesizer.
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,

    /// Minimum rows per group before data-driven thresholds are trusted.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,

    /// Capacity of the workflow event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_history_limit() -> usize {
    100
}

fn default_slow_workflow_threshold_ms() -> u64 {
    30_000
}

fn default_max_insights() -> usize {
    5
}

fn default_min_sample_size() -> usize {
    30
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            slow_workflow_threshold_ms: default_slow_workflow_threshold_ms(),
            step_timeout_secs: None,
            max_insights: default_max_insights(),
            min_sample_size: default_min_sample_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_limit == 0 {
            return Err("history_limit must be >= 1".to_string());
        }
        if self.max_insights == 0 {
            return Err("max_insights must be >= 1".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be >= 1".to_string());
        }
        if self.step_timeout_secs == Some(0) {
            return Err("step_timeout_secs must be > 0 when set".to_string());
        }
        Ok(())
    }
}
