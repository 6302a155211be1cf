//! Weave Runtime
//!
//! Executes loaded weave programs: each cycle senses the world once, measures
//! tension against the model store, explores and commits model adjustments
//! under constraints, and grows the model schema when tension stays high.

pub mod config;
pub mod constraint;
pub mod drift;
pub mod error;
pub mod eval;
pub mod executor;
pub mod gateway;
pub mod history;
pub mod load;
pub mod metaweave;
pub mod program;
pub mod resolve;
pub mod run;
pub mod store;
pub mod tension;
pub mod types;

pub use config::{Aggregation, RuntimeConfig};
pub use error::{Error, LoadError, Result, RuntimeError};
pub use executor::{CycleReport, RunReport, Runtime, StopHandle};
pub use gateway::{Gateway, ScriptedGateway, SensorSnapshot};
pub use load::{LoadedProgram, load};
pub use metaweave::{ScoreDecision, Scorer, ThresholdCountScorer};
pub use program::Program;
pub use store::{ModelStore, ModelView};
pub use types::*;
