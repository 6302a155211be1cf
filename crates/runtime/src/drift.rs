//! Drift exploration
//!
//! Each target proposes at most one candidate per cycle from nothing but its
//! own tension history:
//!
//! - `step = min(rate * latest, max_step)`
//! - the step goes up while tension is flat or falling
//!   (`trend = latest - mean(older) <= 0`) and down once it rises
//! - the candidate is clamped to the target's declared domain
//!
//! Nothing is written to the store here; Constrain and Resolve decide.

use indexmap::IndexMap;
use tracing::{instrument, trace};

use crate::config::DriftConfig;
use crate::history::TensionHistory;
use crate::load::DriftTarget;
use crate::store::{ModelStore, ModelView};
use crate::types::AttrRef;

/// A proposed, uncommitted attribute value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub current: f64,
    pub proposed: f64,
}

/// Candidates keyed by attribute, in drift declaration order
pub type CandidateSet = IndexMap<AttrRef, Candidate>;

/// Propose a value for one target, or `None` when the history is empty or
/// the step would not move the attribute.
pub fn propose(
    target: &DriftTarget,
    current: f64,
    history: &TensionHistory,
    config: &DriftConfig,
) -> Option<f64> {
    let latest = history.latest()?;
    let step = (config.rate * latest).min(target.max_step);
    if !step.is_finite() || step <= 0.0 {
        return None;
    }
    let direction = if history.trend() > 0.0 { -1.0 } else { 1.0 };
    let proposed = (current + direction * step).clamp(target.min, target.max);
    (proposed != current).then_some(proposed)
}

/// Run the drift phase over every target.
#[instrument(skip_all, name = "drift", fields(targets = targets.len()))]
pub fn explore(
    targets: &[DriftTarget],
    histories: &IndexMap<AttrRef, TensionHistory>,
    store: &ModelStore,
    config: &DriftConfig,
) -> CandidateSet {
    let mut candidates = CandidateSet::new();
    for target in targets {
        let Some(history) = histories.get(&target.attr) else {
            continue;
        };
        let Some(current) = store.get(&target.attr).ok().and_then(|v| v.as_scalar()) else {
            continue;
        };
        if let Some(proposed) = propose(target, current, history, config) {
            trace!(attr = %target.attr, current, proposed, "drift candidate");
            candidates.insert(target.attr.clone(), Candidate { current, proposed });
        }
    }
    candidates
}
