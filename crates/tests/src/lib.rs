//! Integration test harness for Weave.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Deserialize → Load → Run cycles → Verify.

use weave_runtime::gateway::Invocation;
use weave_runtime::{
    AttrRef, CycleReport, ModelView, Program, Runtime, ScriptedGateway, SensorId, Value, load,
};

/// Test harness for running weave programs from JSON source.
pub struct TestHarness {
    runtime: Runtime<ScriptedGateway>,
    reports: Vec<CycleReport>,
}

impl TestHarness {
    /// Create a harness whose sensors are all unavailable.
    ///
    /// # Panics
    ///
    /// Panics if the source does not deserialize or load.
    pub fn from_source(source: &str) -> Self {
        Self::with_gateway(source, ScriptedGateway::default())
    }

    /// Create a harness whose sensors hold constant values.
    pub fn with_sensors(source: &str, sensors: &[(&str, f64)]) -> Self {
        Self::with_gateway(source, ScriptedGateway::constant(sensors.iter().copied()))
    }

    /// Create a harness replaying per-cycle sensor frames.
    pub fn with_frames(source: &str, frames: &str) -> Self {
        let gateway = ScriptedGateway::from_json(frames).expect("invalid sensor frames");
        Self::with_gateway(source, gateway)
    }

    pub fn with_gateway(source: &str, gateway: ScriptedGateway) -> Self {
        let program = Program::from_json(source).expect("invalid program JSON");
        let loaded = load(program).expect("program failed to load");
        Self {
            runtime: Runtime::new(loaded, gateway),
            reports: Vec::new(),
        }
    }

    /// Execute a single cycle.
    ///
    /// # Panics
    ///
    /// Panics if the cycle fails fatally.
    pub fn cycle(&mut self) -> &CycleReport {
        let report = self.runtime.execute_cycle().expect("cycle failed");
        self.reports.push(report);
        &self.reports[self.reports.len() - 1]
    }

    /// Execute multiple cycles.
    pub fn run_cycles(&mut self, count: u64) {
        for _ in 0..count {
            self.cycle();
        }
    }

    /// Reports of every cycle run so far.
    pub fn reports(&self) -> &[CycleReport] {
        &self.reports
    }

    /// Get a model attribute's current value.
    pub fn get(&self, attr: &str) -> Option<&Value> {
        let attr = AttrRef::try_from(attr.to_string()).ok()?;
        self.runtime.store().get(&attr).ok()
    }

    /// Get a model attribute's scalar value.
    pub fn get_scalar(&self, attr: &str) -> Option<f64> {
        self.get(attr).and_then(|v| v.as_scalar())
    }

    /// Schema version of a field.
    pub fn schema_version(&self, field: &str) -> Option<u32> {
        self.runtime
            .store()
            .field(&field.into())
            .map(|f| f.schema_version())
    }

    /// Actuator calls recorded by the gateway.
    pub fn invocations(&self) -> &[Invocation] {
        self.runtime.gateway().invocations()
    }

    /// Model values published to the gateway.
    pub fn publications(&self) -> &[(AttrRef, Value)] {
        self.runtime.gateway().publications()
    }

    pub fn discovered(&self) -> Vec<SensorId> {
        self.runtime.discovered().iter().cloned().collect()
    }

    /// Get the number of completed cycles.
    pub fn current_cycle(&self) -> u64 {
        self.runtime.cycle()
    }

    pub fn runtime(&self) -> &Runtime<ScriptedGateway> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime<ScriptedGateway> {
        &mut self.runtime
    }

    /// Replace the sensor frame read from the next cycle on.
    pub fn set_sensors(&mut self, sensors: &[(&str, f64)]) {
        let next = self.runtime.cycle() + 1;
        let gateway = self.runtime.gateway_mut();
        gateway.set_frame(
            next,
            sensors
                .iter()
                .map(|(name, v)| (SensorId::from(*name), *v))
                .collect(),
        );
    }
}
