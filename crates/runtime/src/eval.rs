//! Expression evaluation
//!
//! One visitor serves every block: rule operands and arguments, constraint
//! expressions and resolve objectives all reduce to a scalar here.

use crate::error::EvalError;
use crate::gateway::SensorSnapshot;
use crate::program::Expr;
use crate::store::ModelView;

/// Evaluate `expr` against one sensor snapshot and a (possibly hypothetical)
/// model view.
pub fn eval<M: ModelView + ?Sized>(
    expr: &Expr,
    sensors: &SensorSnapshot,
    model: &M,
) -> Result<f64, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(*v),
        Expr::Sense(sensor) => sensors
            .get(sensor)
            .ok_or_else(|| EvalError::MissingSensor(sensor.clone())),
        Expr::Model(attr) => model
            .get(attr)?
            .as_scalar()
            .ok_or_else(|| EvalError::NonScalar(attr.clone())),
        Expr::Tension(lhs, rhs) => {
            let l = eval(lhs, sensors, model)?;
            let r = eval(rhs, sensors, model)?;
            Ok((l - r).abs())
        }
    }
}
