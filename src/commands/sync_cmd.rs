//! Sync CLI commands: run the scheduler, page a single table, reset.

use clap::Args;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use hubsync::config::Config;
use hubsync::db::init_db;
use hubsync::sync::{
    FileStateStore, HttpTransport, SchedulerOptions, SyncEngine, SyncError, SyncEvent,
    SyncOptions, SyncScheduler,
};

/// Opens the local database and wires an engine to the configured server.
pub async fn open_engine(config: &Config) -> Result<SyncEngine, SyncCommandError> {
    let transport = HttpTransport::from_config(&config.sync)?;
    let state = FileStateStore::open(config.state_path.value.clone())?;
    let pool = init_db(&config.database_path.value)
        .await
        .map_err(SyncError::Database)?;

    Ok(SyncEngine::new(
        pool,
        Arc::new(transport),
        Arc::new(state),
        SyncOptions::from_config(&config.sync),
    ))
}

/// Keep tables in sync until interrupted
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Table to flag for sync on start (repeatable)
    #[arg(long = "table", short)]
    tables: Vec<String>,
}

impl RunCommand {
    pub async fn run(&self, config: &Config) -> Result<(), SyncCommandError> {
        let engine = open_engine(config).await?;
        engine.ensure_ready().await?;

        for table in &self.tables {
            engine.tables().flag_push(table).await;
            engine.tables().flag_pull(table).await;
        }

        let mut events = engine.subscribe();
        let options = SchedulerOptions::from_config(&config.sync);
        let handle = SyncScheduler::new(engine, options).spawn();

        println!(
            "Syncing {} table(s) every {}s. Press Ctrl-C to stop.",
            self.tables.len(),
            options.interval.as_secs()
        );
        println!();

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.map_err(SyncCommandError::Signal)?;
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Skipped {} sync event(s)", missed);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        handle.stop().await;
        Ok(())
    }
}

/// Table argument for single-page commands
#[derive(Debug, Args)]
pub struct TableArgs {
    /// Table name
    pub table: String,
}

/// Pull one page of remote changes.
pub async fn pull(config: &Config, args: &TableArgs) -> Result<(), SyncCommandError> {
    let engine = open_engine(config).await?;
    let report = engine.pull(&args.table).await?;

    println!("Pulled {} row(s) into {}", report.received, args.table);
    if let Some(watermark) = &report.watermark {
        println!("  watermark: {}", watermark);
    }
    if report.more {
        println!("  more pages remain");
    }
    Ok(())
}

/// Push one page of local changes.
pub async fn push(config: &Config, args: &TableArgs) -> Result<(), SyncCommandError> {
    let engine = open_engine(config).await?;
    let report = engine.push(&args.table).await?;

    println!("Pushed {} row(s) from {}", report.pushed, args.table);
    if report.more {
        println!("  more dirty rows remain");
    }
    Ok(())
}

/// Drop all local data and bootstrap again.
pub async fn reset(config: &Config) -> Result<(), SyncCommandError> {
    let engine = open_engine(config).await?;
    engine.reset().await?;
    println!("Local database reset: {}", config.database_path.value.display());
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Pulled { table, rows, more } => {
            println!("  ↓ {} ({} row{}{})", table, rows, plural(*rows), more_suffix(*more));
        }
        SyncEvent::Pushed { table, rows, more } => {
            println!("  ↑ {} ({} row{}{})", table, rows, plural(*rows), more_suffix(*more));
        }
        SyncEvent::Failed { table, op, error } => {
            println!("  ✗ {} {} - {}", op, table, error);
        }
        SyncEvent::Bootstrapped { reset } => {
            println!("  ✓ schema installed{}", if *reset { " (reset)" } else { "" });
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn more_suffix(more: bool) -> &'static str {
    if more {
        ", more"
    } else {
        ""
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    SyncError(SyncError),
    Signal(std::io::Error),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
            SyncCommandError::Signal(e) => write!(f, "Signal handler error: {}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::SyncError(e) => Some(e),
            SyncCommandError::Signal(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}
