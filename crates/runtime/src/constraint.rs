//! Constraint checking
//!
//! The only safety gate between Drift and Resolve. Every constraint is
//! evaluated with all candidates applied hypothetically; a violated
//! constraint vetoes every candidate on the fields it is bound to. A
//! constraint that cannot be evaluated counts as violated.
//!
//! Resolve commits a subset of the accepted candidates, so it re-checks each
//! commit with [`first_violated`] against the committed store plus that one
//! candidate.

use tracing::{debug, instrument, warn};

use crate::drift::CandidateSet;
use crate::eval::eval;
use crate::gateway::SensorSnapshot;
use crate::load::Constraint;
use crate::store::{ModelStore, ModelView, Overlay};
use crate::types::{AttrRef, FieldId, Value};

/// Candidate set after the safety gate
#[derive(Debug, Clone, Default)]
pub struct Checked {
    pub accepted: CandidateSet,
    /// Vetoed attribute and the first constraint that vetoed it
    pub rejected: Vec<(AttrRef, String)>,
    /// Constraints that did not hold this cycle
    pub violations: usize,
}

#[instrument(skip_all, name = "constrain", fields(candidates = candidates.len()))]
pub fn check(
    constraints: &[Constraint],
    candidates: CandidateSet,
    sensors: &SensorSnapshot,
    store: &ModelStore,
) -> Checked {
    let mut overlay = Overlay::new(store);
    for (attr, candidate) in &candidates {
        overlay.insert(attr.clone(), Value::Scalar(candidate.proposed));
    }

    let violated: Vec<_> = constraints
        .iter()
        .filter(|constraint| !holds(constraint, sensors, &overlay))
        .collect();

    let violations = violated.len();
    let mut checked = Checked {
        violations,
        ..Default::default()
    };
    for (attr, candidate) in candidates {
        match violated.iter().find(|c| c.binding.covers(&attr.field)) {
            Some(c) => {
                debug!(attr = %attr, constraint = %c.name, "candidate rejected");
                checked.rejected.push((attr, c.name.clone()));
            }
            None => {
                checked.accepted.insert(attr, candidate);
            }
        }
    }
    checked
}

/// First constraint bound to `field` that does not hold on `view`
pub fn first_violated<'a, M: ModelView + ?Sized>(
    constraints: &'a [Constraint],
    field: &FieldId,
    sensors: &SensorSnapshot,
    view: &M,
) -> Option<&'a Constraint> {
    constraints
        .iter()
        .filter(|c| c.binding.covers(field))
        .find(|c| !holds(c, sensors, view))
}

fn holds<M: ModelView + ?Sized>(constraint: &Constraint, sensors: &SensorSnapshot, view: &M) -> bool {
    match eval(&constraint.expr, sensors, view) {
        Ok(value) => {
            let holds = constraint.comparator.holds(value, constraint.threshold);
            debug!(
                constraint = %constraint.name,
                value,
                threshold = constraint.threshold,
                holds,
                "constraint evaluated"
            );
            holds
        }
        Err(e) => {
            warn!(constraint = %constraint.name, error = %e, "constraint unevaluable, treated as violated");
            false
        }
    }
}
