//! Tension evaluation
//!
//! Rules are pure over the cycle snapshot and the committed store, so their
//! predicates may be evaluated in parallel. Every predicate is computed
//! before any action fires, on both the parallel and the sequential path.
//! Triggered actions are then dispatched to the gateway one by one in
//! declaration order.

use rayon::prelude::*;
use tracing::{debug, instrument, trace, warn};

use crate::config::Aggregation;
use crate::error::EvalError;
use crate::eval::eval;
use crate::gateway::{Gateway, SensorSnapshot};
use crate::load::{Operand, TensionRule};
use crate::store::ModelStore;
use crate::types::{ActionId, AttrRef};

/// One rule whose comparator held this cycle
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredAction {
    pub rule: String,
    pub action: ActionId,
    /// Rendered arguments; always as many as the action's declared arity
    pub args: Vec<f64>,
    /// `|sensed - modeled|`
    pub deviation: f64,
    /// Model operand of the rule, if it has one
    pub target: Option<AttrRef>,
}

/// Outcome of the tension phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensionReport {
    pub triggered: Vec<TriggeredAction>,
    pub magnitude: f64,
    /// Rules skipped because a sensor or argument could not be resolved
    pub skipped: usize,
    pub actuator_errors: usize,
}

impl TensionReport {
    /// Aggregate deviation of the triggered rules whose operand is `attr`.
    /// `None` when no triggered rule targets it.
    pub fn magnitude_for(&self, attr: &AttrRef, aggregation: Aggregation) -> Option<f64> {
        let mut targeted = self
            .triggered
            .iter()
            .filter(|t| t.target.as_ref() == Some(attr))
            .map(|t| t.deviation)
            .peekable();
        targeted.peek()?;
        Some(aggregation.aggregate(targeted))
    }
}

fn evaluate_rule(
    rule: &TensionRule,
    sensors: &SensorSnapshot,
    store: &ModelStore,
) -> Result<Option<TriggeredAction>, EvalError> {
    let sensed = sensors
        .get(&rule.sensor)
        .ok_or_else(|| EvalError::MissingSensor(rule.sensor.clone()))?;
    let modeled = eval(&rule.operand.as_expr(), sensors, store)?;

    if !rule.comparator.holds(sensed, modeled) {
        trace!(rule = %rule.name, sensed, modeled, "rule quiet");
        return Ok(None);
    }

    let args = rule
        .args
        .iter()
        .map(|arg| eval(arg, sensors, store))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(TriggeredAction {
        rule: rule.name.clone(),
        action: rule.action.clone(),
        args,
        deviation: (sensed - modeled).abs(),
        target: match &rule.operand {
            Operand::Model(attr) => Some(attr.clone()),
            Operand::Literal(_) => None,
        },
    }))
}

/// Evaluate every rule and actuate its triggers.
#[instrument(skip_all, name = "tension", fields(rules = rules.len()))]
pub fn evaluate(
    rules: &[TensionRule],
    sensors: &SensorSnapshot,
    store: &ModelStore,
    gateway: &mut dyn Gateway,
    aggregation: Aggregation,
    parallel_threshold: usize,
) -> TensionReport {
    let outcomes: Vec<_> = if rules.len() >= parallel_threshold.max(1) {
        rules
            .par_iter()
            .map(|rule| evaluate_rule(rule, sensors, store))
            .collect()
    } else {
        rules
            .iter()
            .map(|rule| evaluate_rule(rule, sensors, store))
            .collect()
    };

    let mut report = TensionReport::default();
    for (rule, outcome) in rules.iter().zip(outcomes) {
        match outcome {
            Ok(Some(triggered)) => {
                debug!(
                    rule = %rule.name,
                    action = %triggered.action,
                    deviation = triggered.deviation,
                    "tension triggered"
                );
                if let Err(e) = gateway.invoke(&triggered.action, &triggered.args) {
                    warn!(rule = %rule.name, error = %e, "actuator error");
                    report.actuator_errors += 1;
                }
                report.triggered.push(triggered);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "rule skipped");
                report.skipped += 1;
            }
        }
    }

    report.magnitude = aggregation.aggregate(report.triggered.iter().map(|t| t.deviation));
    debug!(
        triggered = report.triggered.len(),
        magnitude = report.magnitude,
        "tension evaluated"
    );
    report
}
