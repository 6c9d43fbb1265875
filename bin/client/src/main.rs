use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use client::{ClientSession, ClientSettings};

/// Cache client: fetch a file through the coordinator, or list the nodes
/// that already hold a copy of it.
#[derive(Parser)]
#[command(name = "cachesync-client", version)]
struct Args {
    /// Path to the client's key=value configuration file.
    #[arg(short, long, default_value = "/etc/cachesync/client.conf")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a local copy of FILE, printing its resolved path.
    Fetch {
        file: PathBuf,
        /// Treat FILE as a bundle (newline-separated list of files) regardless of its name.
        #[arg(long)]
        force_bundle: bool,
        /// Require every bundle member to cache successfully or fail the whole bundle.
        #[arg(long)]
        conjunct: bool,
    },
    /// List the nodes known to hold a cached copy of FILE.
    Locate {
        file: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Push SOURCE out to DESTINATION, registering it as a cached copy.
    Copy {
        source: PathBuf,
        destination: PathBuf,
        /// Copy without registering the result with the coordinator.
        #[arg(long)]
        no_register: bool,
    },
}

fn main() -> ExitCode {
    core::logging::init("warn");
    let args = Args::parse();
    let settings = match ClientSettings::load(&args.config) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot load {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::Fetch { file, force_bundle, conjunct } => run_fetch(settings, &file, force_bundle, conjunct),
        Command::Locate { file, limit } => run_locate(settings, &file, limit),
        Command::Copy { source, destination, no_register } => run_copy(settings, &source, &destination, !no_register),
    }
}

fn run_fetch(settings: ClientSettings, file: &std::path::Path, force_bundle: bool, conjunct: bool) -> ExitCode {
    let mut session = match ClientSession::connect(settings, false) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot connect to coordinator: {err}");
            println!("{}", file.display());
            return ExitCode::FAILURE;
        }
    };
    let result = session.fetch(file, force_bundle, conjunct);
    println!("{}", result.path.display());
    if result.cached {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_copy(settings: ClientSettings, source: &std::path::Path, destination: &std::path::Path, register: bool) -> ExitCode {
    let mut session = match ClientSession::connect(settings, false) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot connect to coordinator: {err}");
            return ExitCode::FAILURE;
        }
    };
    if session.copy(source, destination, register) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_locate(settings: ClientSettings, file: &std::path::Path, limit: Option<usize>) -> ExitCode {
    let mut session = match ClientSession::connect(settings, false) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot connect to coordinator: {err}");
            return ExitCode::FAILURE;
        }
    };
    match session.locate(file, limit) {
        Ok(locations) => {
            for (host, path) in locations {
                if host.is_empty() {
                    println!("{path}");
                } else {
                    println!("{host}:{path}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("locate failed: {err}");
            ExitCode::FAILURE
        }
    }
}
