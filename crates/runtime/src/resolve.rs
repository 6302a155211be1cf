//! Resolve: greedy coherence-seeking commit
//!
//! A one-step hill climb gated by Drift's proposal and Constrain's veto.
//! Objectives are visited in declaration order; a candidate on an attribute
//! an objective reads is committed by the first objective whose value it
//! strictly lowers. Each candidate is committed at most once.
//!
//! Constraints were checked against all candidates at once, but only some of
//! them get committed. Before each commit the constraints bound to its field
//! are evaluated again on the committed store plus that one candidate.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::constraint::first_violated;
use crate::drift::CandidateSet;
use crate::error::{RuntimeError, StoreError};
use crate::eval::eval;
use crate::gateway::SensorSnapshot;
use crate::load::{Constraint, Objective};
use crate::store::{ModelStore, Overlay};
use crate::types::{AttrRef, Value};

/// A committed candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub attr: AttrRef,
    pub previous: f64,
    pub value: f64,
    pub objective: String,
    /// Objective value before and after the commit
    pub before: f64,
    pub after: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub commits: Vec<Commit>,
    /// Candidates an objective evaluated but none improved
    pub retained: usize,
    /// Candidates no objective reads
    pub unresolved: usize,
    pub schema_violations: usize,
    /// Improving candidates vetoed on re-check, with the vetoing constraint
    pub rejected: Vec<(AttrRef, String)>,
}

#[instrument(skip_all, name = "resolve", fields(candidates = accepted.len()))]
pub fn resolve(
    objectives: &[Objective],
    constraints: &[Constraint],
    mut accepted: CandidateSet,
    sensors: &SensorSnapshot,
    store: &mut ModelStore,
) -> Result<Resolution, RuntimeError> {
    let mut resolution = Resolution::default();
    let mut considered = HashSet::new();

    for objective in objectives {
        for attr in &objective.reads {
            let Some(candidate) = accepted.get(attr).copied() else {
                continue;
            };
            considered.insert(attr.clone());

            let before = eval(&objective.expr, sensors, &*store);
            let overlay = Overlay::new(&*store).with(attr.clone(), Value::Scalar(candidate.proposed));
            let after = eval(&objective.expr, sensors, &overlay);
            let (before, after) = match (before, after) {
                (Ok(b), Ok(a)) => (b, a),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(objective = %objective.name, attr = %attr, error = %e, "objective unevaluable, value retained");
                    continue;
                }
            };

            if after >= before {
                debug!(objective = %objective.name, attr = %attr, before, after, "candidate does not improve");
                continue;
            }

            if let Some(c) = first_violated(constraints, &attr.field, sensors, &overlay) {
                warn!(attr = %attr, constraint = %c.name, "commit vetoed");
                resolution.rejected.push((attr.clone(), c.name.clone()));
                accepted.shift_remove(attr);
                continue;
            }

            match store.set(attr, Value::Scalar(candidate.proposed)) {
                Ok(_) => {
                    info!(
                        objective = %objective.name,
                        attr = %attr,
                        from = candidate.current,
                        to = candidate.proposed,
                        before,
                        after,
                        "resolve commit"
                    );
                    resolution.commits.push(Commit {
                        attr: attr.clone(),
                        previous: candidate.current,
                        value: candidate.proposed,
                        objective: objective.name.clone(),
                        before,
                        after,
                    });
                    accepted.shift_remove(attr);
                }
                Err(StoreError::SchemaViolation { attr, message }) => {
                    warn!(attr = %attr, %message, "commit dropped");
                    resolution.schema_violations += 1;
                    accepted.shift_remove(&attr);
                }
                Err(e) => return Err(RuntimeError::StoreCorrupted(e.to_string())),
            }
        }
    }

    for attr in accepted.keys() {
        if considered.contains(attr) {
            resolution.retained += 1;
        } else {
            resolution.unresolved += 1;
        }
    }
    Ok(resolution)
}
