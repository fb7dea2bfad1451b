use clap::Args;
use serde_json::json;

use hubsync::config::Config;
use hubsync::db::Param;
use hubsync::sync::{Outcome, RunOptions};

use super::sync_cmd::{open_engine, SyncCommandError};

/// Run a read query, pulling its tables alongside
#[derive(Debug, Args)]
pub struct QueryCommand {
    /// Table the query reads (repeatable)
    #[arg(long = "table", short)]
    tables: Vec<String>,

    /// Drop all local data and bootstrap before querying
    #[arg(long)]
    reset: bool,

    /// SQL statement, with `?` placeholders
    sql: String,

    /// Placeholder values; numbers and `null` are typed, anything else is text
    params: Vec<String>,
}

impl QueryCommand {
    pub async fn run(&self, config: &Config) -> Result<(), SyncCommandError> {
        let engine = open_engine(config).await?;

        let tables: Vec<&str> = self.tables.iter().map(String::as_str).collect();
        let params: Vec<Param> = self.params.iter().map(|p| Param::parse_arg(p)).collect();
        let options = RunOptions { reset: self.reset };

        let outcome = engine.query(&tables, &self.sql, &params, options).await;
        let status = outcome.status();
        let output = match outcome {
            Outcome::Success(rows) => json!({ "status": status, "rows": rows }),
            Outcome::Error(e) => json!({ "status": status, "error": e.to_string() }),
        };

        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_else(|e| e.to_string())
        );
        Ok(())
    }
}
