//! Stable event names and stages for structured logging.
//!
//! Event names are used as the `event` field on every tracing record the
//! estimator emits, so JSONL consumers can filter without parsing messages.

use serde::{Deserialize, Serialize};

/// Phases of estimator work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Construction, configuration and parameter initialisation.
    Init,
    /// EM iterations.
    Fit,
    /// Forward-backward or Viterbi passes without updates.
    Score,
    /// Drawing state and observation sequences.
    Sample,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Fit => "fit",
            Stage::Score => "score",
            Stage::Sample => "sample",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Configuration
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const PARAMS_INITIALIZED: &str = "params.initialized";

    // EM lifecycle
    pub const FIT_STARTED: &str = "fit.started";
    pub const FIT_ITERATION: &str = "fit.iteration";
    pub const FIT_CONVERGED: &str = "fit.converged";
    pub const FIT_FINISHED: &str = "fit.finished";
    pub const STATE_SKIPPED: &str = "fit.state_skipped";

    // Scoring and generation
    pub const SCORE_COMPUTED: &str = "score.computed";
    pub const SAMPLE_DRAWN: &str = "sample.drawn";
}
