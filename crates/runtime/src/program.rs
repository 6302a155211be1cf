//! Program representation
//!
//! The structured tree an external `.weave` parser produces, serialized as
//! JSON. Nothing here is validated; [`crate::load`] resolves every reference
//! before a runtime is built.
//!
//! Expressions accept a compact form: a bare number is a literal,
//! `{"sense": "x"}` reads a sensor, `{"model": "field.attr"}` reads the model
//! store and `{"tension": [a, b]}` is the absolute difference `|a - b|`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::types::{ActionId, AttrRef, Comparator, FieldId, Phase, SensorId, Value};

/// A complete program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub config: RuntimeConfig,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub sensors: Vec<SensorId>,
    #[serde(default)]
    pub actions: Vec<ActionDecl>,
    #[serde(default)]
    pub tension: Vec<TensionRuleDecl>,
    #[serde(default)]
    pub drift: Vec<DriftDecl>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDecl>,
    #[serde(default)]
    pub resolve: Vec<ObjectiveDecl>,
    #[serde(default)]
    pub metaweave: MetaweaveDecl,
    #[serde(rename = "loop")]
    pub loop_directive: LoopDecl,
}

impl Program {
    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }
}

/// `field name { attr: value, ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: FieldId,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
}

/// Actuator action with a fixed argument count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: ActionId,
    pub arity: usize,
}

/// `sense(sensor) <cmp> operand => action(args)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensionRuleDecl {
    #[serde(default)]
    pub name: Option<String>,
    pub sensor: SensorId,
    pub comparator: Comparator,
    /// Model reference or literal
    pub operand: Expr,
    pub action: ActionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: ActionId,
    #[serde(default)]
    pub args: Vec<Expr>,
}

/// `drift field.attr [min, max]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDecl {
    pub target: AttrRef,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Overrides `config.drift.max_step` for this target
    #[serde(default)]
    pub step: Option<f64>,
}

/// `constrain expr <cmp> threshold`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDecl {
    #[serde(default)]
    pub name: Option<String>,
    pub expr: Expr,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Explicit field binding; defaults to the fields the expression reads
    #[serde(default)]
    pub field: Option<FieldId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveMode {
    #[default]
    Minimize,
}

/// `resolve minimize expr`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveDecl {
    #[serde(default)]
    pub name: Option<String>,
    pub expr: Expr,
    #[serde(default)]
    pub mode: ObjectiveMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaweaveDecl {
    #[serde(default)]
    pub primitives: Vec<PrimitiveDecl>,
    #[serde(default)]
    pub extend: Vec<ExtendDecl>,
}

/// Sensor-backed primitive, discoverable when `tension > threshold`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimitiveDecl {
    pub name: SensorId,
    pub sensor: SensorId,
    pub threshold: f64,
}

/// `extend field { attribute: initial } if guard`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendDecl {
    pub field: FieldId,
    pub attribute: String,
    pub initial: Value,
    pub guard: GuardDecl,
}

/// `sense(sensor) <cmp> threshold`, defaulting to `> 0`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardDecl {
    pub sensor: SensorId,
    #[serde(default = "default_gate_comparator")]
    pub comparator: Comparator,
    #[serde(default)]
    pub threshold: f64,
}

/// `loop iterations { phases } execute metaweave if tension > T`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDecl {
    pub iterations: u64,
    #[serde(default = "default_phases")]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub metaweave: Option<GateDecl>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateDecl {
    #[serde(default = "default_gate_comparator")]
    pub comparator: Comparator,
    pub threshold: f64,
}

fn default_gate_comparator() -> Comparator {
    Comparator::Gt
}

fn default_phases() -> Vec<Phase> {
    Phase::ALL.to_vec()
}

/// Expression tree shared by rule operands, arguments, constraints and
/// objectives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExprRepr", into = "ExprRepr")]
pub enum Expr {
    Literal(f64),
    Sense(SensorId),
    Model(AttrRef),
    /// `|lhs - rhs|`
    Tension(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn sense(name: &str) -> Self {
        Expr::Sense(SensorId::from(name))
    }

    pub fn model(field: &str, attribute: &str) -> Self {
        Expr::Model(AttrRef::new(field, attribute))
    }

    pub fn tension(lhs: Expr, rhs: Expr) -> Self {
        Expr::Tension(Box::new(lhs), Box::new(rhs))
    }

    /// Walk the tree depth-first, left to right.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        if let Expr::Tension(lhs, rhs) = self {
            lhs.visit(f);
            rhs.visit(f);
        }
    }

    /// Model references in visiting order (duplicates kept)
    pub fn model_refs(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Model(r) = e {
                refs.push(r);
            }
        });
        refs
    }

    /// Sensor references in visiting order (duplicates kept)
    pub fn sensor_refs(&self) -> Vec<&SensorId> {
        let mut refs = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Sense(s) = e {
                refs.push(s);
            }
        });
        refs
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExprRepr {
    Number(f64),
    Literal { literal: f64 },
    Sense { sense: SensorId },
    Model { model: AttrRef },
    Tension { tension: (Box<Expr>, Box<Expr>) },
}

impl From<ExprRepr> for Expr {
    fn from(repr: ExprRepr) -> Self {
        match repr {
            ExprRepr::Number(v) | ExprRepr::Literal { literal: v } => Expr::Literal(v),
            ExprRepr::Sense { sense } => Expr::Sense(sense),
            ExprRepr::Model { model } => Expr::Model(model),
            ExprRepr::Tension {
                tension: (lhs, rhs),
            } => Expr::Tension(lhs, rhs),
        }
    }
}

impl From<Expr> for ExprRepr {
    fn from(expr: Expr) -> Self {
        match expr {
            Expr::Literal(v) => ExprRepr::Number(v),
            Expr::Sense(sense) => ExprRepr::Sense { sense },
            Expr::Model(model) => ExprRepr::Model { model },
            Expr::Tension(lhs, rhs) => ExprRepr::Tension {
                tension: (lhs, rhs),
            },
        }
    }
}
