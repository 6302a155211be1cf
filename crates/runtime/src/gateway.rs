//! Sensor/actuator gateway
//!
//! The boundary to whatever embodies the agents. The engine reads every
//! sensor once per cycle into a [`SensorSnapshot`] and never assumes that an
//! actuator call succeeds.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, trace, warn};

use crate::error::GatewayError;
use crate::types::{ActionId, AttrRef, CycleContext, SensorId, Value};

/// Embodiment boundary
pub trait Gateway: Send {
    /// Called once before the cycle's snapshot is taken
    fn begin_cycle(&mut self, _ctx: CycleContext) {}

    fn read(&mut self, sensor: &SensorId) -> Result<f64, GatewayError>;

    fn invoke(&mut self, action: &ActionId, args: &[f64]) -> Result<(), GatewayError>;

    /// Push a model value that changed during the cycle
    fn publish(&mut self, _attr: &AttrRef, _value: &Value) {}
}

/// Sensor values seen by every rule of one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    values: IndexMap<SensorId, f64>,
}

impl SensorSnapshot {
    /// Read `sensors` from the gateway. Unavailable or non-finite readings
    /// are left out of the snapshot.
    pub fn capture<'a>(
        gateway: &mut dyn Gateway,
        sensors: impl IntoIterator<Item = &'a SensorId>,
    ) -> Self {
        let mut values = IndexMap::new();
        for sensor in sensors {
            match gateway.read(sensor) {
                Ok(v) if v.is_finite() => {
                    trace!(sensor = %sensor, value = v, "sensor read");
                    values.insert(sensor.clone(), v);
                }
                Ok(v) => warn!(sensor = %sensor, value = v, "non-finite sensor reading dropped"),
                Err(e) => warn!(sensor = %sensor, error = %e, "sensor unavailable"),
            }
        }
        Self { values }
    }

    pub fn get(&self, sensor: &SensorId) -> Option<f64> {
        self.values.get(sensor).copied()
    }

    pub fn contains(&self, sensor: &SensorId) -> bool {
        self.values.contains_key(sensor)
    }

    pub fn insert(&mut self, sensor: SensorId, value: f64) {
        self.values.insert(sensor, value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(SensorId, f64)> for SensorSnapshot {
    fn from_iter<T: IntoIterator<Item = (SensorId, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One recorded actuator call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub cycle: u64,
    pub action: ActionId,
    pub args: Vec<f64>,
}

/// Sensor frame file: a single frame or a list of per-cycle frames
#[derive(Deserialize)]
#[serde(untagged)]
enum FramesRepr {
    Many(Vec<IndexMap<SensorId, f64>>),
    One(IndexMap<SensorId, f64>),
}

/// Gateway replaying scripted sensor frames
///
/// Cycle `n` reads frame `n - 1`; once the script runs out the last frame
/// repeats. Every invocation and publication is recorded.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    frames: Vec<IndexMap<SensorId, f64>>,
    current: usize,
    cycle: u64,
    failing: HashSet<ActionId>,
    invocations: Vec<Invocation>,
    publications: Vec<(AttrRef, Value)>,
}

impl ScriptedGateway {
    pub fn new(frames: Vec<IndexMap<SensorId, f64>>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    /// Gateway whose sensors hold the same values every cycle
    pub fn constant<'a>(values: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        let frame = values
            .into_iter()
            .map(|(name, v)| (SensorId::from(name), v))
            .collect();
        Self::new(vec![frame])
    }

    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        let frames = match serde_json::from_str::<FramesRepr>(source)? {
            FramesRepr::Many(frames) => frames,
            FramesRepr::One(frame) => vec![frame],
        };
        Ok(Self::new(frames))
    }

    /// Make every invocation of `action` fail with an actuator error
    pub fn fail_action(mut self, action: &str) -> Self {
        self.failing.insert(ActionId::from(action));
        self
    }

    pub fn push_frame(&mut self, frame: IndexMap<SensorId, f64>) {
        self.frames.push(frame);
    }

    /// Read `frame` from `cycle` on, dropping any later frames. Gaps before
    /// `cycle` repeat the last scripted frame.
    pub fn set_frame(&mut self, cycle: u64, frame: IndexMap<SensorId, f64>) {
        let index = cycle.saturating_sub(1) as usize;
        let filler = self.frames.last().cloned().unwrap_or_default();
        self.frames.resize(index, filler);
        self.frames.push(frame);
    }

    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }

    pub fn publications(&self) -> &[(AttrRef, Value)] {
        &self.publications
    }
}

impl Gateway for ScriptedGateway {
    fn begin_cycle(&mut self, ctx: CycleContext) {
        self.cycle = ctx.cycle;
        let last = self.frames.len().saturating_sub(1);
        self.current = (ctx.cycle.saturating_sub(1) as usize).min(last);
    }

    fn read(&mut self, sensor: &SensorId) -> Result<f64, GatewayError> {
        self.frames
            .get(self.current)
            .and_then(|frame| frame.get(sensor))
            .copied()
            .ok_or_else(|| GatewayError::Unavailable(sensor.clone()))
    }

    fn invoke(&mut self, action: &ActionId, args: &[f64]) -> Result<(), GatewayError> {
        if self.failing.contains(action) {
            return Err(GatewayError::ActuatorError {
                action: action.clone(),
                message: "scripted failure".to_string(),
            });
        }
        info!(cycle = self.cycle, action = %action, ?args, "actuate");
        self.invocations.push(Invocation {
            cycle: self.cycle,
            action: action.clone(),
            args: args.to_vec(),
        });
        Ok(())
    }

    fn publish(&mut self, attr: &AttrRef, value: &Value) {
        trace!(attr = %attr, %value, "publish");
        self.publications.push((attr.clone(), value.clone()));
    }
}
