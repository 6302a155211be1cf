//! Load-time resolution
//!
//! Turns a [`Program`] into a [`LoadedProgram`] whose every reference is known
//! to resolve: fields and attributes exist and are scalar where a number is
//! needed, sensors are declared (or are metaweave primitives), actions exist
//! and receive exactly their declared number of arguments. The first failing
//! declaration is reported as a [`LoadError`].

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, instrument};

use crate::config::RuntimeConfig;
use crate::error::{Error, LoadError};
use crate::program::{Expr, Program};
use crate::store::{ModelStore, ModelView};
use crate::types::{ActionId, AttrRef, Comparator, FieldId, Phase, SensorId, Value};

/// Right-hand side of a tension rule
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Model(AttrRef),
    Literal(f64),
}

impl Operand {
    pub fn as_expr(&self) -> Expr {
        match self {
            Operand::Model(attr) => Expr::Model(attr.clone()),
            Operand::Literal(v) => Expr::Literal(*v),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TensionRule {
    pub name: String,
    pub sensor: SensorId,
    pub comparator: Comparator,
    pub operand: Operand,
    pub action: ActionId,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct DriftTarget {
    pub attr: AttrRef,
    pub min: f64,
    pub max: f64,
    pub max_step: f64,
}

/// Fields a constraint guards
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Fields(Vec<FieldId>),
    /// Pure sensor gate: guards every candidate
    All,
}

impl Binding {
    pub fn covers(&self, field: &FieldId) -> bool {
        match self {
            Binding::Fields(fields) => fields.contains(field),
            Binding::All => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub expr: Expr,
    pub comparator: Comparator,
    pub threshold: f64,
    pub binding: Binding,
}

#[derive(Debug, Clone)]
pub struct Objective {
    pub name: String,
    pub expr: Expr,
    /// Distinct model attributes the objective reads
    pub reads: Vec<AttrRef>,
}

#[derive(Debug, Clone)]
pub struct Primitive {
    pub name: SensorId,
    pub sensor: SensorId,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct Guard {
    pub sensor: SensorId,
    pub comparator: Comparator,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct ExtensionRule {
    pub field: FieldId,
    pub attribute: String,
    pub initial: Value,
    pub guard: Guard,
}

#[derive(Debug, Clone, Copy)]
pub struct Gate {
    pub comparator: Comparator,
    pub threshold: f64,
}

impl Gate {
    pub fn admits(&self, magnitude: f64) -> bool {
        self.comparator.holds(magnitude, self.threshold)
    }
}

#[derive(Debug, Clone)]
pub struct LoopDirective {
    pub iterations: u64,
    pub phases: IndexSet<Phase>,
    pub metaweave_gate: Option<Gate>,
}

impl LoopDirective {
    pub fn runs(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}

/// A program whose references have all been resolved
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub config: RuntimeConfig,
    pub store: ModelStore,
    pub sensors: Vec<SensorId>,
    pub actions: IndexMap<ActionId, usize>,
    pub rules: Vec<TensionRule>,
    pub drift_targets: Vec<DriftTarget>,
    pub constraints: Vec<Constraint>,
    pub objectives: Vec<Objective>,
    pub primitives: Vec<Primitive>,
    pub extensions: Vec<ExtensionRule>,
    pub loop_directive: LoopDirective,
}

struct Scope<'a> {
    store: &'a ModelStore,
    sensors: HashSet<&'a SensorId>,
}

impl Scope<'_> {
    fn check_sensor(&self, sensor: &SensorId, decl: &str) -> Result<(), LoadError> {
        if self.sensors.contains(sensor) {
            Ok(())
        } else {
            Err(LoadError::new(decl, format!("unknown sensor `{sensor}`")))
        }
    }

    fn check_scalar(&self, attr: &AttrRef, decl: &str) -> Result<f64, LoadError> {
        match self.store.get(attr) {
            Ok(Value::Scalar(v)) => Ok(*v),
            Ok(Value::Vector(_)) => Err(LoadError::new(decl, format!("`{attr}` is not a scalar"))),
            Err(e) => Err(LoadError::new(decl, e.to_string())),
        }
    }

    fn check_expr(&self, expr: &Expr, decl: &str) -> Result<(), LoadError> {
        let mut result = Ok(());
        expr.visit(&mut |e| {
            if result.is_err() {
                return;
            }
            result = match e {
                Expr::Literal(v) => finite(*v, decl),
                Expr::Sense(sensor) => self.check_sensor(sensor, decl),
                Expr::Model(attr) => self.check_scalar(attr, decl).map(|_| ()),
                Expr::Tension(..) => Ok(()),
            };
        });
        result
    }
}

fn finite(v: f64, decl: &str) -> Result<(), LoadError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(LoadError::new(decl, format!("non-finite number {v}")))
    }
}

fn finite_value(v: &Value, decl: &str) -> Result<(), LoadError> {
    match v {
        Value::Scalar(x) => finite(*x, decl),
        Value::Vector(xs) => xs.iter().try_for_each(|x| finite(*x, decl)),
    }
}

/// Resolve every declaration of `program`.
///
/// Returns [`Error::Load`] for an unresolvable declaration and
/// [`Error::Runtime`] for a duplicate field name.
#[instrument(skip_all, name = "load")]
pub fn load(program: Program) -> Result<LoadedProgram, Error> {
    program.config.validate()?;

    let mut store = ModelStore::default();
    for field in &program.fields {
        let decl = format!("field {}", field.name);
        for value in field.attributes.values() {
            finite_value(value, &decl)?;
        }
        store.insert_field(field.name.clone(), field.attributes.clone())?;
    }

    let mut declared = IndexSet::new();
    for sensor in &program.sensors {
        if !declared.insert(sensor.clone()) {
            return Err(LoadError::new(format!("sensor {sensor}"), "declared twice").into());
        }
    }

    let mut primitives = Vec::new();
    let mut primitive_names = HashSet::new();
    for p in &program.metaweave.primitives {
        let decl = format!("metaweave primitive {}", p.name);
        if declared.contains(&p.name) || !primitive_names.insert(p.name.clone()) {
            return Err(LoadError::new(decl, "primitive name is already taken").into());
        }
        if !declared.contains(&p.sensor) {
            return Err(LoadError::new(decl, format!("unknown backing sensor `{}`", p.sensor)).into());
        }
        finite(p.threshold, &decl)?;
        primitives.push(Primitive {
            name: p.name.clone(),
            sensor: p.sensor.clone(),
            threshold: p.threshold,
        });
    }

    let mut actions = IndexMap::new();
    for action in &program.actions {
        if actions.insert(action.name.clone(), action.arity).is_some() {
            return Err(LoadError::new(format!("action {}", action.name), "declared twice").into());
        }
    }

    let scope = Scope {
        store: &store,
        sensors: declared.iter().chain(primitive_names.iter()).collect(),
    };

    let mut rules = Vec::with_capacity(program.tension.len());
    for (i, rule) in program.tension.iter().enumerate() {
        let name = rule.name.clone().unwrap_or_else(|| format!("tension[{i}]"));
        scope.check_sensor(&rule.sensor, &name)?;
        let operand = match &rule.operand {
            Expr::Model(attr) => {
                scope.check_scalar(attr, &name)?;
                Operand::Model(attr.clone())
            }
            Expr::Literal(v) => {
                finite(*v, &name)?;
                Operand::Literal(*v)
            }
            _ => {
                return Err(LoadError::new(&name, "operand must be a model reference or literal").into());
            }
        };
        let arity = actions.get(&rule.action.name).copied().ok_or_else(|| {
            LoadError::new(&name, format!("unknown action `{}`", rule.action.name))
        })?;
        if rule.action.args.len() != arity {
            return Err(LoadError::new(
                &name,
                format!(
                    "action `{}` takes {arity} arguments, {} given",
                    rule.action.name,
                    rule.action.args.len()
                ),
            )
            .into());
        }
        for arg in &rule.action.args {
            scope.check_expr(arg, &name)?;
        }
        rules.push(TensionRule {
            name,
            sensor: rule.sensor.clone(),
            comparator: rule.comparator,
            operand,
            action: rule.action.name.clone(),
            args: rule.action.args.clone(),
        });
    }

    let mut drift_targets = Vec::with_capacity(program.drift.len());
    let mut drifted = HashSet::new();
    for d in &program.drift {
        let decl = format!("drift {}", d.target);
        scope.check_scalar(&d.target, &decl)?;
        if !drifted.insert(d.target.clone()) {
            return Err(LoadError::new(decl, "attribute is already a drift target").into());
        }
        let min = d.min.unwrap_or(f64::NEG_INFINITY);
        let max = d.max.unwrap_or(f64::INFINITY);
        if min.is_nan() || max.is_nan() || min > max {
            return Err(LoadError::new(decl, format!("empty domain [{min}, {max}]")).into());
        }
        let max_step = d.step.unwrap_or(program.config.drift.max_step);
        if !max_step.is_finite() || max_step < 0.0 {
            return Err(LoadError::new(decl, "step must be finite and non-negative").into());
        }
        drift_targets.push(DriftTarget {
            attr: d.target.clone(),
            min,
            max,
            max_step,
        });
    }

    let mut constraints = Vec::with_capacity(program.constraints.len());
    for (i, c) in program.constraints.iter().enumerate() {
        let name = c.name.clone().unwrap_or_else(|| format!("constrain[{i}]"));
        scope.check_expr(&c.expr, &name)?;
        finite(c.threshold, &name)?;
        let binding = match &c.field {
            Some(field) => {
                if store.field(field).is_none() {
                    return Err(LoadError::new(&name, format!("unknown field `{field}`")).into());
                }
                Binding::Fields(vec![field.clone()])
            }
            None => {
                let fields: IndexSet<FieldId> =
                    c.expr.model_refs().into_iter().map(|r| r.field.clone()).collect();
                if fields.is_empty() {
                    Binding::All
                } else {
                    Binding::Fields(fields.into_iter().collect())
                }
            }
        };
        constraints.push(Constraint {
            name,
            expr: c.expr.clone(),
            comparator: c.comparator,
            threshold: c.threshold,
            binding,
        });
    }

    let mut objectives = Vec::with_capacity(program.resolve.len());
    for (i, o) in program.resolve.iter().enumerate() {
        let name = o.name.clone().unwrap_or_else(|| format!("resolve[{i}]"));
        scope.check_expr(&o.expr, &name)?;
        let reads: IndexSet<AttrRef> = o.expr.model_refs().into_iter().cloned().collect();
        if reads.is_empty() {
            return Err(LoadError::new(&name, "objective reads no model attribute").into());
        }
        objectives.push(Objective {
            name,
            expr: o.expr.clone(),
            reads: reads.into_iter().collect(),
        });
    }

    let mut extensions = Vec::with_capacity(program.metaweave.extend.len());
    for e in &program.metaweave.extend {
        let decl = format!("extend {}.{}", e.field, e.attribute);
        if store.field(&e.field).is_none() {
            return Err(LoadError::new(decl, format!("unknown field `{}`", e.field)).into());
        }
        scope.check_sensor(&e.guard.sensor, &decl)?;
        finite(e.guard.threshold, &decl)?;
        finite_value(&e.initial, &decl)?;
        extensions.push(ExtensionRule {
            field: e.field.clone(),
            attribute: e.attribute.clone(),
            initial: e.initial.clone(),
            guard: Guard {
                sensor: e.guard.sensor.clone(),
                comparator: e.guard.comparator,
                threshold: e.guard.threshold,
            },
        });
    }

    let lp = &program.loop_directive;
    let metaweave_gate = match lp.metaweave {
        Some(gate) => {
            finite(gate.threshold, "loop")?;
            Some(Gate {
                comparator: gate.comparator,
                threshold: gate.threshold,
            })
        }
        None => None,
    };
    let loop_directive = LoopDirective {
        iterations: lp.iterations,
        phases: lp.phases.iter().copied().collect(),
        metaweave_gate,
    };

    drop(scope);
    debug!(
        fields = program.fields.len(),
        rules = rules.len(),
        drift = drift_targets.len(),
        constraints = constraints.len(),
        objectives = objectives.len(),
        primitives = primitives.len(),
        "program loaded"
    );

    Ok(LoadedProgram {
        config: program.config,
        store,
        sensors: declared.into_iter().collect(),
        actions,
        rules,
        drift_targets,
        constraints,
        objectives,
        primitives,
        extensions,
        loop_directive,
    })
}
