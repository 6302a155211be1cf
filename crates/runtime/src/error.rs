//! Runtime errors
//!
//! Two classes of failure exist. Fatal errors ([`LoadError`],
//! [`RuntimeError`]) abort a run and surface through [`Error`]. Everything
//! scoped to a single rule, target, action or primitive has its own type and
//! is logged and counted by the phase that hit it; sibling evaluations in the
//! same cycle are unaffected.

use thiserror::Error;

use crate::types::{ActionId, AttrRef, FieldId, SensorId};

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A program declaration that cannot be resolved. Raised before any cycle runs.
#[derive(Debug, Error)]
#[error("load error in {declaration}: {reason}")]
pub struct LoadError {
    /// The failing declaration, e.g. `tension[2]` or `drift agent.speed`
    pub declaration: String,
    pub reason: String,
}

impl LoadError {
    pub fn new(declaration: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            declaration: declaration.into(),
            reason: reason.into(),
        }
    }
}

/// Unrecoverable model store inconsistency
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("duplicate field name: {0}")]
    DuplicateField(FieldId),

    #[error("model store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("runtime aborted by an earlier fatal error")]
    Aborted,
}

/// Model store access failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("field not found: {0}")]
    FieldNotFound(FieldId),

    #[error("attribute not found: {0}")]
    NotFound(AttrRef),

    #[error("schema violation on {attr}: {message}")]
    SchemaViolation { attr: AttrRef, message: String },
}

/// Gateway boundary failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("sensor unavailable: {0}")]
    Unavailable(SensorId),

    #[error("actuator {action} failed: {message}")]
    ActuatorError { action: ActionId, message: String },
}

/// Expression evaluation failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("missing sensor: {0}")]
    MissingSensor(SensorId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0} is not a scalar")]
    NonScalar(AttrRef),
}

/// Scoring hook failure; metaweave is skipped for the cycle
#[derive(Debug, Clone, Error, PartialEq)]
#[error("synthesis failed: {0}")]
pub struct SynthesisError(pub String);
