//! keytrigger simulator.
//!
//! Loads a key map configuration, replays a trace of timed key events through
//! the engine on a virtual clock, and prints what the engine did.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use keytrigger::sim::{self, Trace};
use keytrigger::Config;

#[derive(Debug, Parser)]
#[command(
    name = "keytrigger",
    version,
    about = "Replay a key event trace against a key map configuration"
)]
struct Args {
    /// Key map configuration (TOML).
    config: PathBuf,
    /// Trace of timed key events (TOML).
    trace: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let trace = match Trace::load(&args.trace) {
        Ok(trace) => trace,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    for record in sim::run(config, &trace) {
        println!("{record}");
    }
    ExitCode::SUCCESS
}
