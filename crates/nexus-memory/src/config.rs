//! Tunables for recall and reflection.
//!
//! Loaded as the `memory` section of the simulation config; every field has
//! a named default so partial YAML is accepted.

use serde::Deserialize;

/// Configuration for memory recall and reflection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryConfig {
    /// Candidates fetched per requested memory before ranking (default: 10).
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,

    /// Recall refreshes `last_access` only when it is older than this
    /// window, in milliseconds (default: 5 minutes).
    #[serde(default = "default_access_throttle_ms")]
    pub access_throttle_ms: u64,

    /// Per-hour decay applied to the recency score (default: 0.99).
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f64,

    /// Importance budget that must be exceeded to reflect (default: 500).
    #[serde(default = "default_reflection_threshold")]
    pub reflection_threshold: f64,

    /// Most recent memories considered for a reflection (default: 100).
    #[serde(default = "default_reflection_window")]
    pub reflection_window: usize,

    /// Importance assigned when a score cannot be parsed (default: 5).
    #[serde(default = "default_importance")]
    pub default_importance: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            overfetch: default_overfetch(),
            access_throttle_ms: default_access_throttle_ms(),
            recency_decay: default_recency_decay(),
            reflection_threshold: default_reflection_threshold(),
            reflection_window: default_reflection_window(),
            default_importance: default_importance(),
        }
    }
}

const fn default_overfetch() -> usize {
    10
}

const fn default_access_throttle_ms() -> u64 {
    300_000
}

const fn default_recency_decay() -> f64 {
    0.99
}

const fn default_reflection_threshold() -> f64 {
    500.0
}

const fn default_reflection_window() -> usize {
    100
}

const fn default_importance() -> f64 {
    5.0
}
