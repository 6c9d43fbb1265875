use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Coordinator daemon: tracks which nodes hold which cached files and
/// schedules copies between them.
#[derive(Parser)]
#[command(name = "coordinatord", version)]
struct Args {
    /// Path to the coordinator's key=value configuration file.
    #[arg(short, long, default_value = "/etc/cachesync/coordinator.conf")]
    config: PathBuf,
}

fn main() -> ExitCode {
    core::logging::init("info");
    let args = Args::parse();
    match coordinator::run(&args.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "coordinator exited with an error");
            ExitCode::FAILURE
        }
    }
}
