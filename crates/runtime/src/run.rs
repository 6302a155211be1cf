//! File-driven execution
//!
//! Loads a JSON program and optional sensor frames from disk, applies
//! command-line overrides, and runs the result on a [`ScriptedGateway`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Aggregation;
use crate::error::{Error, LoadError, RuntimeError};
use crate::executor::{RunReport, Runtime};
use crate::gateway::ScriptedGateway;
use crate::load::load;
use crate::program::Program;
use crate::store::ModelStore;

/// Overrides applied on top of the program's own `config` and `loop`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cycle count; the loop directive's `iterations` when `None`
    pub cycles: Option<u64>,
    pub aggregation: Option<Aggregation>,
    pub history_capacity: Option<usize>,
}

impl RunOptions {
    fn apply(&self, program: &mut Program) {
        if let Some(aggregation) = self.aggregation {
            program.config.aggregation = aggregation;
        }
        if let Some(capacity) = self.history_capacity {
            program.config.history_capacity = capacity;
        }
    }
}

/// Errors emitted while running a program from disk
#[derive(Debug, Error)]
pub enum RunError {
    #[error("io error: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("deserialize error: {}: {source}", .path.display())]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<Error> for RunError {
    fn from(e: Error) -> Self {
        match e {
            Error::Load(e) => RunError::Load(e),
            Error::Runtime(e) => RunError::Runtime(e),
        }
    }
}

impl RunError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Io { .. } | RunError::Deserialize { .. } => 1,
            RunError::Load(_) => 2,
            RunError::Runtime(_) => 3,
        }
    }
}

fn read(path: &Path) -> Result<String, RunError> {
    std::fs::read_to_string(path).map_err(|source| RunError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and deserialize a program file without loading it
pub fn read_program(path: &Path) -> Result<Program, RunError> {
    let data = read(path)?;
    Program::from_json(&data).map_err(|source| RunError::Deserialize {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a sensor frame file into a scripted gateway
pub fn read_sensor_frames(path: &Path) -> Result<ScriptedGateway, RunError> {
    let data = read(path)?;
    ScriptedGateway::from_json(&data).map_err(|source| RunError::Deserialize {
        path: path.to_path_buf(),
        source,
    })
}

/// Finished run: the runtime (store, gateway, histories) and its report
pub struct Outcome {
    pub runtime: Runtime<ScriptedGateway>,
    pub report: RunReport,
}

/// Load `program`, apply `options` and run it against `gateway`
pub fn run_program(
    mut program: Program,
    options: &RunOptions,
    gateway: ScriptedGateway,
) -> Result<Outcome, RunError> {
    options.apply(&mut program);
    let loaded = load(program)?;
    let cycles = options.cycles.unwrap_or(loaded.loop_directive.iterations);
    debug!(cycles, "program loaded");

    let mut runtime = Runtime::new(loaded, gateway);
    let report = runtime.run(cycles)?;
    Ok(Outcome { runtime, report })
}

/// Convenience helper to read, load and run from paths
pub fn run_program_file(
    path: &Path,
    sensors: Option<&Path>,
    options: &RunOptions,
) -> Result<Outcome, RunError> {
    info!(program = %path.display(), "loading program");
    let program = read_program(path)?;
    let gateway = match sensors {
        Some(frames) => read_sensor_frames(frames)?,
        None => ScriptedGateway::default(),
    };
    run_program(program, options, gateway)
}

/// One line per attribute: `field.attribute = value`, schema version per field
pub fn store_summary(store: &ModelStore) -> String {
    let mut out = String::new();
    for field in store.fields() {
        let _ = writeln!(out, "{} (schema v{})", field.name, field.schema_version());
        for (attribute, value) in field.attributes() {
            let _ = writeln!(out, "  {}.{} = {}", field.name, attribute, value);
        }
    }
    out
}
