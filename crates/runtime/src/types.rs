//! Core runtime types
//!
//! Identifiers, values and comparators shared by every phase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tolerance applied by `==` and `!=` comparisons.
pub const COMPARE_EPSILON: f64 = 1e-9;

/// Unique identifier for a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub String);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a sensor (declared or synthesized)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub String);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for an actuator action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to one attribute of one field, written `field.attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttrRef {
    pub field: FieldId,
    pub attribute: String,
}

impl AttrRef {
    pub fn new(field: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            field: FieldId(field.into()),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.field, self.attribute)
    }
}

impl TryFrom<String> for AttrRef {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.split_once('.') {
            Some((field, attribute)) if !field.is_empty() && !attribute.is_empty() => {
                Ok(AttrRef::new(field, attribute))
            }
            _ => Err(format!("expected `field.attribute`, got `{s}`")),
        }
    }
}

impl From<AttrRef> for String {
    fn from(r: AttrRef) -> Self {
        r.to_string()
    }
}

/// Runtime value of a model attribute
///
/// Sensors are always scalar; attributes may also hold fixed-length vectors
/// (positions, headings) which are published to the gateway as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Scalar(_) => None,
            Value::Vector(v) => Some(v),
        }
    }

    /// Two values have the same shape when both are scalars or both are
    /// vectors of equal length.
    pub fn same_shape(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(_), Value::Scalar(_)) => true,
            (Value::Vector(a), Value::Vector(b)) => a.len() == b.len(),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Scalar(0.0)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Comparison operator used by guards, constraints and gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Eq => (lhs - rhs).abs() <= COMPARE_EPSILON,
            Comparator::Ne => (lhs - rhs).abs() > COMPARE_EPSILON,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Cycle phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Tension,
    Drift,
    Constrain,
    Resolve,
    Metaweave,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 5] = [
        Phase::Tension,
        Phase::Drift,
        Phase::Constrain,
        Phase::Resolve,
        Phase::Metaweave,
    ];
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    /// A fatal error ended the last run; the runtime refuses further cycles.
    Aborted,
}

/// Context available during one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleContext {
    /// 1-based cycle number across the runtime's lifetime
    pub cycle: u64,
}
