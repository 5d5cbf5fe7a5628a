//! ChronoDB Inspect Binary
//!
//! Maintenance tool for a ChronoDB data directory.

use std::path::PathBuf;
use std::process::ExitCode;

use chronodb::tombstone::TombstoneLog;
use chronodb::{Config, Engine, FileKind, FileResource, FileVersionController};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// ChronoDB maintenance tool
#[derive(Parser, Debug)]
#[command(name = "chronodb-inspect")]
#[command(about = "Inspect and recover ChronoDB storage files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recover every data file of a data directory, then seal and exit
    Recover {
        /// Data directory
        #[arg(short, long, default_value = "./chronodb_data")]
        data_dir: PathBuf,

        /// Parallel recovery workers
        #[arg(short = 't', long, default_value = "4")]
        threads: usize,
    },

    /// Print the device time ranges stored next to a data file
    Resource {
        /// Data file whose `.resource` companion is read
        file: PathBuf,
    },

    /// Print the live tombstones of a data file
    Tombstones {
        /// Data file whose `.mods` companion is read
        file: PathBuf,
    },

    /// Print the version checkpoint of a version directory
    ///
    /// Read-only: the next engine start issues versions from
    /// `checkpoint + interval`.
    Version {
        /// Directory holding the `Version-<N>` marker
        dir: PathBuf,

        /// Versions between checkpoints
        #[arg(short, long, default_value = "100")]
        interval: u64,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chronodb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::debug!("ChronoDB inspect v{}", chronodb::VERSION);

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> chronodb::Result<()> {
    match command {
        Command::Recover { data_dir, threads } => {
            let config = Config::builder()
                .data_dir(&data_dir)
                .recovery_threads(threads)
                .build();
            let engine = Engine::open(config)?;
            for kind in [FileKind::Sequence, FileKind::Unsequence] {
                for file in engine.sealed_files_of(kind) {
                    println!("{:?}\t{}", kind, file.display());
                }
            }
            engine.close()
        }

        Command::Resource { file } => {
            let mut resource = FileResource::new(&file);
            resource.deserialize()?;
            println!("device\tstart\tend");
            for (device, start) in resource.start_times() {
                let end = resource
                    .end_time(device)
                    .map_or_else(|| "-".to_string(), |t| t.to_string());
                println!("{}\t{}\t{}", device, start, end);
            }
            Ok(())
        }

        Command::Tombstones { file } => {
            let log = TombstoneLog::for_data_file(&file);
            for modification in log.read()? {
                println!("{}", modification);
            }
            Ok(())
        }

        Command::Version { dir, interval } => {
            match FileVersionController::read_marker(&dir)? {
                Some(checkpoint) => {
                    println!("checkpointed\t{}", checkpoint);
                    println!("next start\t{}", checkpoint.saturating_add(interval));
                }
                None => println!("no version marker in {}", dir.display()),
            }
            Ok(())
        }
    }
}
