//! Cycle executor
//!
//! Orchestrates one weave cycle through its phases:
//! Tension → Drift → Constrain → Resolve → (gated) Metaweave → Publish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::constraint;
use crate::drift::{self, CandidateSet};
use crate::error::{Error, Result, RuntimeError};
use crate::gateway::{Gateway, SensorSnapshot};
use crate::history::TensionHistory;
use crate::load::LoadedProgram;
use crate::metaweave::{self, Scorer, SynthesisContext, ThresholdCountScorer};
use crate::resolve::{self, Commit};
use crate::store::{ModelStore, ModelView};
use crate::tension::{self, TensionReport};
use crate::types::{AttrRef, CycleContext, Phase, RunState, SensorId, Value};

/// Requests that a run end before its next cycle
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Consume a pending stop request
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Everything observable about one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub tension: TensionReport,
    /// Candidates proposed by Drift
    pub candidates: usize,
    /// Candidates vetoed by Constrain or by Resolve's re-check, with the
    /// vetoing constraint
    pub rejected: Vec<(AttrRef, String)>,
    pub violations: usize,
    pub commits: Vec<Commit>,
    pub retained: usize,
    pub unresolved: usize,
    pub schema_violations: usize,
    pub metaweave_ran: bool,
    pub synthesis_skipped: bool,
    pub discovered: Vec<SensorId>,
    pub extensions: Vec<(AttrRef, Value)>,
}

/// Outcome of [`Runtime::run`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub cycles: Vec<CycleReport>,
    /// The run ended early through its [`StopHandle`]
    pub stopped: bool,
}

impl RunReport {
    pub fn cycles_run(&self) -> usize {
        self.cycles.len()
    }

    pub fn commits(&self) -> usize {
        self.cycles.iter().map(|c| c.commits.len()).sum()
    }

    pub fn invocations(&self) -> usize {
        self.cycles
            .iter()
            .map(|c| c.tension.triggered.len() - c.tension.actuator_errors)
            .sum()
    }
}

/// Runtime state for one loaded program
pub struct Runtime<G: Gateway> {
    program: LoadedProgram,
    gateway: G,
    scorer: Box<dyn Scorer>,
    /// Tension history per drift target
    histories: IndexMap<AttrRef, TensionHistory>,
    /// Cycle magnitudes, fed to the scorer
    global_history: TensionHistory,
    /// Discovered metaweave primitives; only ever grows
    discovered: IndexSet<SensorId>,
    /// Completed cycles
    cycle: u64,
    state: RunState,
    stop: StopHandle,
}

impl<G: Gateway> Runtime<G> {
    /// Create a runtime using the threshold-count scorer from the program config
    pub fn new(program: LoadedProgram, gateway: G) -> Self {
        let scorer = ThresholdCountScorer::from(&program.config.scorer);
        Self::with_scorer(program, gateway, scorer)
    }

    pub fn with_scorer(program: LoadedProgram, gateway: G, scorer: impl Scorer + 'static) -> Self {
        let capacity = program.config.history_capacity;
        let histories = program
            .drift_targets
            .iter()
            .map(|t| (t.attr.clone(), TensionHistory::new(capacity)))
            .collect();
        info!(
            fields = program.store.fields().count(),
            rules = program.rules.len(),
            drift_targets = program.drift_targets.len(),
            history_capacity = capacity,
            "runtime created"
        );
        Self {
            program,
            gateway,
            scorer: Box::new(scorer),
            histories,
            global_history: TensionHistory::new(capacity),
            discovered: IndexSet::new(),
            cycle: 0,
            state: RunState::Idle,
            stop: StopHandle::default(),
        }
    }

    /// Completed cycle count
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &ModelStore {
        &self.program.store
    }

    pub fn program(&self) -> &LoadedProgram {
        &self.program
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn discovered(&self) -> &IndexSet<SensorId> {
        &self.discovered
    }

    /// Tension history of a drift target
    pub fn history(&self, attr: &AttrRef) -> Option<&TensionHistory> {
        self.histories.get(attr)
    }

    pub fn global_history(&self) -> &TensionHistory {
        &self.global_history
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the cycle count of the program's loop directive
    pub fn run_loop(&mut self) -> Result<RunReport> {
        self.run(self.program.loop_directive.iterations)
    }

    /// Run `cycles` cycles, ending early when the stop handle fires
    #[instrument(skip(self), name = "run")]
    pub fn run(&mut self, cycles: u64) -> Result<RunReport> {
        if self.state == RunState::Aborted {
            return Err(RuntimeError::Aborted.into());
        }
        self.state = RunState::Running;
        info!(cycles, start = self.cycle + 1, "run starting");

        let mut report = RunReport::default();
        for _ in 0..cycles {
            if self.stop.take() {
                info!(cycle = self.cycle, "run stopped");
                report.stopped = true;
                break;
            }
            report.cycles.push(self.execute_cycle()?);
        }

        self.state = RunState::Completed;
        info!(
            cycles = report.cycles_run(),
            commits = report.commits(),
            discovered = self.discovered.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Execute a single cycle
    ///
    /// A fatal error moves the runtime to [`RunState::Aborted`]; every later
    /// call fails with [`RuntimeError::Aborted`].
    #[instrument(skip(self), fields(cycle = self.cycle + 1))]
    pub fn execute_cycle(&mut self) -> Result<CycleReport> {
        if self.state == RunState::Aborted {
            return Err(RuntimeError::Aborted.into());
        }
        match self.cycle_inner() {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "fatal error, runtime aborted");
                self.state = RunState::Aborted;
                Err(e)
            }
        }
    }

    fn cycle_inner(&mut self) -> Result<CycleReport> {
        trace!("cycle start");
        let ctx = CycleContext {
            cycle: self.cycle + 1,
        };
        let mut report = CycleReport {
            cycle: ctx.cycle,
            ..Default::default()
        };

        let mut sensors = self.snapshot(ctx);

        // Phase 1: Tension
        if self.program.loop_directive.runs(Phase::Tension) {
            report.tension = self.execute_tension_phase(&sensors);
        }

        // Phases 2-4: Drift, Constrain, Resolve
        let candidates = if self.program.loop_directive.runs(Phase::Drift) {
            self.execute_drift_phase()
        } else {
            CandidateSet::new()
        };
        report.candidates = candidates.len();
        self.execute_adapt_phases(candidates, &sensors, &mut report)?;

        // Phase 5: Metaweave
        if self.metaweave_admitted(report.tension.magnitude) {
            self.execute_metaweave_phase(&mut sensors, &mut report)?;
        }

        self.publish(&report)?;

        self.cycle += 1;
        trace!("cycle complete");
        Ok(report)
    }

    /// Read declared sensors, then expose discovered primitives under their own names
    fn snapshot(&mut self, ctx: CycleContext) -> SensorSnapshot {
        self.gateway.begin_cycle(ctx);
        let mut sensors = SensorSnapshot::capture(&mut self.gateway, &self.program.sensors);
        for primitive in &self.program.primitives {
            if !self.discovered.contains(&primitive.name) {
                continue;
            }
            if let Some(v) = sensors.get(&primitive.sensor) {
                sensors.insert(primitive.name.clone(), v);
            }
        }
        debug!(sensors = sensors.len(), "snapshot taken");
        sensors
    }

    fn execute_tension_phase(&mut self, sensors: &SensorSnapshot) -> TensionReport {
        let cfg = &self.program.config;
        let report = tension::evaluate(
            &self.program.rules,
            sensors,
            &self.program.store,
            &mut self.gateway,
            cfg.aggregation,
            cfg.tension_parallel_threshold,
        );

        for (attr, history) in self.histories.iter_mut() {
            let value = report
                .magnitude_for(attr, cfg.aggregation)
                .unwrap_or(report.magnitude);
            history.push(value);
        }
        self.global_history.push(report.magnitude);
        report
    }

    fn execute_drift_phase(&self) -> CandidateSet {
        drift::explore(
            &self.program.drift_targets,
            &self.histories,
            &self.program.store,
            &self.program.config.drift,
        )
    }

    /// Constrain then Resolve. Resolve never sees unchecked candidates.
    fn execute_adapt_phases(
        &mut self,
        candidates: CandidateSet,
        sensors: &SensorSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let directive = &self.program.loop_directive;
        let resolving = directive.runs(Phase::Resolve);
        if !directive.runs(Phase::Constrain) {
            if !resolving {
                return Ok(());
            }
            debug!(cycle = self.cycle, "constrain runs because resolve is enabled");
        }

        let checked = constraint::check(
            &self.program.constraints,
            candidates,
            sensors,
            &self.program.store,
        );
        report.rejected = checked.rejected;
        report.violations = checked.violations;
        if !resolving {
            return Ok(());
        }

        let resolution = resolve::resolve(
            &self.program.objectives,
            &self.program.constraints,
            checked.accepted,
            sensors,
            &mut self.program.store,
        )?;
        report.commits = resolution.commits;
        report.retained = resolution.retained;
        report.unresolved = resolution.unresolved;
        report.schema_violations = resolution.schema_violations;
        report.violations += resolution.rejected.len();
        report.rejected.extend(resolution.rejected);
        Ok(())
    }

    fn metaweave_admitted(&self, magnitude: f64) -> bool {
        let directive = &self.program.loop_directive;
        directive.runs(Phase::Metaweave)
            && directive
                .metaweave_gate
                .is_some_and(|gate| gate.admits(magnitude))
    }

    fn execute_metaweave_phase(
        &mut self,
        sensors: &mut SensorSnapshot,
        report: &mut CycleReport,
    ) -> Result<()> {
        report.metaweave_ran = true;
        let synthesis = metaweave::synthesize(
            &self.program.primitives,
            &self.program.extensions,
            SynthesisContext {
                magnitude: report.tension.magnitude,
                history: &self.global_history,
                scorer: self.scorer.as_ref(),
                discovered: &mut self.discovered,
                sensors,
                store: &mut self.program.store,
            },
        )?;
        report.synthesis_skipped = synthesis.skipped.is_some();
        report.discovered = synthesis.discovered;
        report.extensions = synthesis.extended;
        Ok(())
    }

    /// Push every attribute committed or added this cycle to the gateway
    fn publish(&mut self, report: &CycleReport) -> Result<()> {
        let changed = report
            .commits
            .iter()
            .map(|c| &c.attr)
            .chain(report.extensions.iter().map(|(attr, _)| attr));
        for attr in changed {
            let value = self.program.store.get(attr).map_err(|e| {
                warn!(attr = %attr, "changed attribute vanished");
                Error::from(RuntimeError::StoreCorrupted(e.to_string()))
            })?;
            self.gateway.publish(attr, value);
        }
        Ok(())
    }
}
