//! Weave Run - executes a weave program against scripted sensor frames
//!
//! Loads a JSON program, replays sensor frames through a scripted gateway,
//! runs the requested cycles and prints the final model store.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weave_runtime::Aggregation;
use weave_runtime::run::{RunOptions, run_program_file, store_summary};

#[derive(Parser, Debug)]
#[command(name = "weave-run")]
#[command(about = "Run a Weave program against scripted sensor frames")]
struct Cli {
    /// Path to a program JSON file
    program: PathBuf,

    /// Number of cycles to run (defaults to the program's loop iterations)
    #[arg(long)]
    cycles: Option<u64>,

    /// Sensor frames JSON: one object, or a list with one object per cycle
    #[arg(long)]
    sensors: Option<PathBuf>,

    /// Tension magnitude aggregation
    #[arg(long)]
    aggregation: Option<Aggregation>,

    /// Capacity of every tension history
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Print the run summary as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weave_run=info,weave_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Argument errors exit 1; 2 is reserved for load errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if cli.sensors.is_none() {
        warn!("no sensor frames given, every sensor reads as unavailable");
    }

    let options = RunOptions {
        cycles: cli.cycles,
        aggregation: cli.aggregation,
        history_capacity: cli.history_capacity,
    };

    let outcome = match run_program_file(&cli.program, cli.sensors.as_deref(), &options) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e}");
            eprintln!("weave-run: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let report = &outcome.report;
    let store = outcome.runtime.store();
    info!(
        cycles = report.cycles_run(),
        commits = report.commits(),
        invocations = report.invocations(),
        stopped = report.stopped,
        "run finished"
    );

    if cli.json {
        let fields: serde_json::Map<String, serde_json::Value> = store
            .fields()
            .map(|field| {
                let attributes: serde_json::Map<_, _> = field
                    .attributes()
                    .map(|(name, value)| {
                        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                        (name.clone(), value)
                    })
                    .collect();
                (field.name.to_string(), serde_json::Value::Object(attributes))
            })
            .collect();
        let summary = serde_json::json!({
            "cycles": report.cycles_run(),
            "commits": report.commits(),
            "invocations": report.invocations(),
            "discovered": outcome.runtime.discovered().iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "fields": fields,
        });
        println!("{summary:#}");
    } else {
        println!(
            "{} cycles, {} commits, {} actuator invocations",
            report.cycles_run(),
            report.commits(),
            report.invocations()
        );
        print!("{}", store_summary(store));
    }
}
