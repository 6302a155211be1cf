//! Metaweave: primitive synthesis and schema growth
//!
//! Runs only in cycles whose magnitude passes the loop gate. Discovery is
//! delegated to a pluggable [`Scorer`]; the engine never looks inside it.
//! Scoring is fail-open: if any call errors, the whole synthesis step is
//! skipped for the cycle and nothing is registered or extended.

use indexmap::IndexSet;
use tracing::{debug, info, instrument, warn};

use crate::config::ScorerConfig;
use crate::error::{RuntimeError, StoreError, SynthesisError};
use crate::gateway::SensorSnapshot;
use crate::history::TensionHistory;
use crate::load::{ExtensionRule, Primitive};
use crate::store::{ExtendOutcome, ModelStore};
use crate::types::{AttrRef, SensorId, Value};

/// Scorer verdict for one primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreDecision {
    pub register: bool,
}

/// Pluggable discovery hook: recent tension history in, decision out
pub trait Scorer: Send + Sync {
    fn score(&self, history: &[f64], latest: f64) -> Result<ScoreDecision, SynthesisError>;
}

impl<F> Scorer for F
where
    F: Fn(&[f64], f64) -> Result<ScoreDecision, SynthesisError> + Send + Sync,
{
    fn score(&self, history: &[f64], latest: f64) -> Result<ScoreDecision, SynthesisError> {
        self(history, latest)
    }
}

/// Registers when the backing value is finite and at least `min_hits`
/// history entries exceed `level`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCountScorer {
    pub level: f64,
    pub min_hits: usize,
}

impl From<&ScorerConfig> for ThresholdCountScorer {
    fn from(cfg: &ScorerConfig) -> Self {
        Self {
            level: cfg.level,
            min_hits: cfg.min_hits,
        }
    }
}

impl Default for ThresholdCountScorer {
    fn default() -> Self {
        Self::from(&ScorerConfig::default())
    }
}

impl Scorer for ThresholdCountScorer {
    fn score(&self, history: &[f64], latest: f64) -> Result<ScoreDecision, SynthesisError> {
        let hits = history.iter().filter(|m| **m > self.level).count();
        Ok(ScoreDecision {
            register: latest.is_finite() && hits >= self.min_hits,
        })
    }
}

/// Outcome of one synthesis step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    /// Primitives discovered this cycle
    pub discovered: Vec<SensorId>,
    /// Attributes added this cycle with their initial values
    pub extended: Vec<(AttrRef, Value)>,
    /// Set when the scorer failed and synthesis was skipped
    pub skipped: Option<SynthesisError>,
}

/// Everything synthesis reads and writes
pub struct SynthesisContext<'a> {
    pub magnitude: f64,
    pub history: &'a TensionHistory,
    pub scorer: &'a dyn Scorer,
    pub discovered: &'a mut IndexSet<SensorId>,
    pub sensors: &'a mut SensorSnapshot,
    pub store: &'a mut ModelStore,
}

#[instrument(skip_all, name = "metaweave", fields(magnitude = ctx.magnitude))]
pub fn synthesize(
    primitives: &[Primitive],
    extensions: &[ExtensionRule],
    ctx: SynthesisContext<'_>,
) -> Result<Synthesis, RuntimeError> {
    let mut synthesis = Synthesis::default();
    let history = ctx.history.to_vec();

    // Score first, register after: a failing scorer leaves no partial state.
    let mut registrations = Vec::new();
    for primitive in primitives {
        if ctx.discovered.contains(&primitive.name) || ctx.magnitude <= primitive.threshold {
            continue;
        }
        let Some(latest) = ctx.sensors.get(&primitive.sensor) else {
            debug!(primitive = %primitive.name, sensor = %primitive.sensor, "backing sensor missing");
            continue;
        };
        match ctx.scorer.score(&history, latest) {
            Ok(decision) if decision.register => registrations.push((primitive, latest)),
            Ok(_) => debug!(primitive = %primitive.name, "scorer declined"),
            Err(e) => {
                warn!(primitive = %primitive.name, error = %e, "synthesis skipped");
                synthesis.skipped = Some(e);
                return Ok(synthesis);
            }
        }
    }

    for (primitive, latest) in registrations {
        if ctx.discovered.insert(primitive.name.clone()) {
            info!(primitive = %primitive.name, sensor = %primitive.sensor, "primitive discovered");
            ctx.sensors.insert(primitive.name.clone(), latest);
            synthesis.discovered.push(primitive.name.clone());
        }
    }

    for rule in extensions {
        let Some(guard_value) = ctx.sensors.get(&rule.guard.sensor) else {
            continue;
        };
        if !rule.guard.comparator.holds(guard_value, rule.guard.threshold) {
            continue;
        }
        match ctx.store.extend(&rule.field, &rule.attribute, rule.initial.clone()) {
            Ok(ExtendOutcome::Added { schema_version }) => {
                info!(
                    field = %rule.field,
                    attribute = %rule.attribute,
                    schema_version,
                    "field extended"
                );
                synthesis.extended.push((
                    AttrRef::new(rule.field.0.clone(), rule.attribute.clone()),
                    rule.initial.clone(),
                ));
            }
            Ok(ExtendOutcome::AlreadyExists) => {}
            Err(e @ StoreError::FieldNotFound(_)) => {
                return Err(RuntimeError::StoreCorrupted(e.to_string()));
            }
            Err(e) => warn!(field = %rule.field, error = %e, "extension dropped"),
        }
    }

    Ok(synthesis)
}
