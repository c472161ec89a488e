mod config;
mod database;
mod dispatch;
mod grid;
mod queue;


use clap::{Parser, Subcommand};
use config::{ConfigErrors, SweepConfig};
use database::{sqlite::GridStore, IfExists, Status, StoreError};
use dispatch::{DispatchError, Dispatcher};
use grid::GridError;
use std::{path::PathBuf, process::exit};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gridsweep", version, about = "Parameter grid generator and SQLite-backed work queue for batch job submission")]
struct Cli {
    /// Log level, overridden by RUST_LOG when set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the parameter grid and persist it as the shared work queue
    Init {
        /// Path to the sweep config file
        config: PathBuf,

        /// Store path, defaults to the config path with a `.db` extension
        #[arg(long)]
        db: Option<PathBuf>,

        /// What to do when the store already exists
        #[arg(long, value_enum, default_value = "skip")]
        if_exists: IfExists,
    },
    /// Claim one pending cell, submit it and mark it completed
    Run {
        /// Path to the sweep config file
        config: PathBuf,

        /// Job submission command, e.g. sbatch
        submit_command: String,

        /// Extra arguments placed before the per-parameter flags
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        submit_args: Vec<String>,

        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "skip")]
        if_exists: IfExists,
    },
    /// Claim and submit cells until none remain pending
    Drain {
        /// Path to the sweep config file
        config: PathBuf,

        /// Job submission command, e.g. sbatch
        submit_command: String,

        /// Extra arguments placed before the per-parameter flags
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        submit_args: Vec<String>,

        /// Concurrent workers, 0 for one per CPU
        #[arg(long, default_value_t = 1)]
        workers: usize,

        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "skip")]
        if_exists: IfExists,
    },
    /// Show how many cells are pending, in progress and completed
    Status {
        /// Path to the sweep config file
        config: PathBuf,

        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[derive(Error, Debug)]
enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Grid generation failed: {0}")]
    Grid(#[from] GridError),
    #[error("Grid store failure: {0}")]
    Store(#[from] StoreError),
    #[error("Dispatch failure: {0}")]
    Dispatch(#[from] DispatchError),
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG takes priority over --log-level
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    if let Err(error) = run(cli.command) {
        error!("{error}");

        exit(1);
    }
}

/// Load the config, run preflight checks and build or reuse the store.
fn prepare_store(
    config_path: &PathBuf,
    db: Option<PathBuf>,
    if_exists: IfExists,
) -> Result<(SweepConfig, PathBuf, GridStore), RunnerError> {
    let config = SweepConfig::load(config_path)?;

    if config.preflight_checks() {
        exit(1);
    }

    let grid = grid::generate(&config.parameters)?;
    let db_path = config.database_path(config_path, db);
    let store = GridStore::create(&db_path, &grid, if_exists)?;

    Ok((config, db_path, store))
}

fn run(command: Commands) -> Result<(), RunnerError> {
    match command {
        Commands::Init {
            config,
            db,
            if_exists,
        } => {
            let (_, db_path, store) = prepare_store(&config, db, if_exists)?;

            info!(
                path = %db_path.display(),
                cells = store.cell_count()?,
                "Grid store ready"
            );
        }
        Commands::Run {
            config,
            submit_command,
            submit_args,
            db,
            if_exists,
        } => {
            let (config, _, mut store) = prepare_store(&config, db, if_exists)?;
            let dispatcher = Dispatcher::new(&config, submit_command, submit_args);

            dispatcher.run_once(&mut store)?;
        }
        Commands::Drain {
            config,
            submit_command,
            submit_args,
            workers,
            db,
            if_exists,
        } => {
            let (config, db_path, mut store) = prepare_store(&config, db, if_exists)?;
            let dispatcher = Dispatcher::new(&config, submit_command, submit_args);

            let completed = if workers == 1 {
                dispatcher.drain(&mut store)?
            } else {
                let columns = store.columns().to_vec();
                drop(store);

                dispatcher.drain_parallel(&db_path, &columns, workers)?
            };

            info!(completed, "All workers finished");
        }
        Commands::Status { config, db } => {
            let sweep = SweepConfig::load(&config)?;
            let db_path = sweep.database_path(&config, db);
            let store = GridStore::open(&db_path, sweep.parameters.names())?;
            let counts = store.status_counts()?;

            for status in [Status::Pending, Status::InProgress, Status::Completed] {
                println!("{status}: {}", counts.get(&status).copied().unwrap_or(0));
            }
        }
    }

    Ok(())
}
