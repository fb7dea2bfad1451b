use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, QueryCommand, RunCommand, TableArgs};
use hubsync::config::Config;

#[derive(Parser)]
#[command(name = "hubsync")]
#[command(version)]
#[command(about = "Offline-first sync between a local SQLite database and a sync server", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep tables in sync until interrupted
    Run(RunCommand),

    /// Pull one page of remote changes for a table
    Pull(TableArgs),

    /// Push one page of local changes for a table
    Push(TableArgs),

    /// Drop all local data and bootstrap the schema again
    Reset,

    /// Run a read query, pulling its tables alongside
    Query(QueryCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Run(cmd)) => cmd.run(&config).await?,
        Some(Commands::Pull(args)) => commands::pull(&config, &args).await?,
        Some(Commands::Push(args)) => commands::push(&config, &args).await?,
        Some(Commands::Reset) => commands::reset(&config).await?,
        Some(Commands::Query(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
