//! shift-tracker: offline tooling around the tracking coordinator.
//!
//! ## Subcommands
//!
//! - `replay`: feed a recorded JSON-lines transcript through a coordinator
//!   backed by the local SQLite store and print the outcome
//! - `gaps`: list the persisted GPS gaps of a shift

mod logging;

use clap::{Parser, Subcommand};
use shift_tracker::config::load_runtime_config;
use shift_tracker::db::{default_db_path, Db};
use shift_tracker::replay::{read_transcript, replay};
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shift-tracker")]
#[command(about = "Shift-bound GPS tracking coordinator tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines transcript and print the final session as JSON
    Replay {
        /// Transcript file, one step per line
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// SQLite database (defaults to ~/.shift-tracker/tracker.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Config file (defaults to ~/.shift-tracker/config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the GPS gaps recorded for a shift
    Gaps {
        #[arg(value_name = "SHIFT_ID")]
        shift_id: String,

        /// SQLite database (defaults to ~/.shift-tracker/tracker.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay { file, db, config } => run_replay(file, db, config),
        Commands::Gaps { shift_id, db } => run_gaps(&shift_id, db),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "shift-tracker failed");
        std::process::exit(1);
    }
}

fn run_replay(
    file: PathBuf,
    db_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<(), String> {
    let config = load_runtime_config(config_path).map_err(|err| err.to_string())?;
    let db = open_db(db_path)?;
    let reader = fs_err::File::open(&file).map_err(|err| err.to_string())?;
    let steps = read_transcript(BufReader::new(reader)).map_err(|err| err.to_string())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to start runtime: {}", err))?;
    let report = runtime
        .block_on(replay(steps, db, config))
        .map_err(|err| err.to_string())?;

    let output = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("Failed to serialize report: {}", err))?;
    println!("{}", output);
    Ok(())
}

fn run_gaps(shift_id: &str, db_path: Option<PathBuf>) -> Result<(), String> {
    let db = open_db(db_path)?;
    let gaps = db.list_gaps(shift_id)?;
    let output = serde_json::to_string_pretty(&gaps)
        .map_err(|err| format!("Failed to serialize gaps: {}", err))?;
    println!("{}", output);
    Ok(())
}

fn open_db(path: Option<PathBuf>) -> Result<Db, String> {
    let path = match path {
        Some(path) => path,
        None => default_db_path()?,
    };
    Db::new(path)
}
