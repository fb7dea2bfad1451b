mod values;

pub use values::{bind_json, bind_param, row_to_map, row_to_values, Param, Row};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Connection;
use std::path::Path;
use std::str::FromStr;

/// Hidden per-row column holding the sync phase.
pub const PHASE_COLUMN: &str = "sync_pp";

/// Sync phase of a local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Authoritative copy, nothing pending.
    Pull,
    /// Locally dirty, waiting for upload.
    Push,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Pull => "PULL",
            SyncPhase::Push => "PUSH",
        }
    }
}

/// Open (creating if needed) the local database.
///
/// No migrations are run here; the schema is installed by the sync
/// bootstrap from the remote schema script.
pub async fn init_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names of `table` in declaration order.
///
/// Returns an empty list when the table does not exist.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Drop every user table and view, leaving an empty database.
pub async fn drop_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;

    // Has no effect inside a transaction, so toggle it around one.
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await?;

    let dropped = drop_objects(&mut *conn).await;

    if let Err(e) = sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await
    {
        // Keep the connection out of the pool with foreign keys off.
        drop(conn.detach());
        dropped?;
        return Err(e);
    }

    let count = dropped?;
    tracing::debug!("Dropped {} local schema object(s)", count);
    Ok(())
}

async fn drop_objects(conn: &mut SqliteConnection) -> Result<usize, sqlx::Error> {
    let objects: Vec<(String, String)> = sqlx::query_as(
        "SELECT type, name FROM sqlite_master \
         WHERE type IN ('view', 'table') AND name NOT LIKE 'sqlite_%' \
         ORDER BY type DESC",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut tx = conn.begin().await?;
    for (kind, name) in &objects {
        let statement = if kind == "view" {
            format!("DROP VIEW IF EXISTS {}", quote_ident(name))
        } else {
            format!("DROP TABLE IF EXISTS {}", quote_ident(name))
        };
        sqlx::query(&statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(objects.len())
}
