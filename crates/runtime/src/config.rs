//! Runtime tuning
//!
//! Loaded from the program's optional `config` section; every key has a
//! default so programs may omit the section entirely.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// How triggered-rule deviations combine into one cycle magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Sum,
    Max,
}

impl Aggregation {
    /// Aggregate deviations; an empty set aggregates to 0.
    pub fn aggregate(self, deviations: impl IntoIterator<Item = f64>) -> f64 {
        match self {
            Aggregation::Sum => deviations.into_iter().sum(),
            Aggregation::Max => deviations.into_iter().fold(0.0, f64::max),
        }
    }
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Aggregation::Sum),
            "max" => Ok(Aggregation::Max),
            other => Err(format!("unknown aggregation `{other}` (expected sum or max)")),
        }
    }
}

/// Top-level runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum length of every tension history
    pub history_capacity: usize,

    /// Cycle magnitude aggregation
    pub aggregation: Aggregation,

    /// Drift exploration parameters
    pub drift: DriftConfig,

    /// Parameters of the built-in metaweave scorer
    pub scorer: ScorerConfig,

    /// Minimum rule count before tension predicates are evaluated in parallel
    pub tension_parallel_threshold: usize,
}

/// Drift step parameters: `step = min(rate * latest, max_step)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub rate: f64,
    pub max_step: f64,
}

/// Threshold-count scorer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// History entries strictly above this level count as hits
    pub level: f64,
    /// Hits required to register a primitive
    pub min_hits: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_capacity: 16,
            aggregation: Aggregation::Sum,
            drift: DriftConfig::default(),
            scorer: ScorerConfig::default(),
            tension_parallel_threshold: 8,
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            rate: 0.1,
            max_step: 0.5,
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            level: 0.0,
            min_hits: 1,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> std::result::Result<(), LoadError> {
        if self.history_capacity == 0 {
            return Err(LoadError::new("config", "history_capacity must be > 0"));
        }
        for (name, value) in [
            ("drift.rate", self.drift.rate),
            ("drift.max_step", self.drift.max_step),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LoadError::new(
                    "config",
                    format!("{name} must be finite and non-negative, got {value}"),
                ));
            }
        }
        if !self.scorer.level.is_finite() {
            return Err(LoadError::new("config", "scorer.level must be finite"));
        }
        Ok(())
    }
}
