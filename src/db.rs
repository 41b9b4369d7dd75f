//! SQLite connection setup for the `sqlite` storage adapter.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) a WAL-mode database at `path`.
///
/// `None` opens a private in-memory database. It is limited to a single
/// connection, since every new in-memory connection would see an empty
/// database.
pub async fn connect(path: Option<&Path>) -> Result<SqlitePool> {
    let (options, max_connections) = match path {
        Some(db_path) => {
            // Ensure parent directory exists
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
            }
            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);
            (options, 5)
        }
        None => (SqliteConnectOptions::from_str("sqlite::memory:")?, 1),
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options.foreign_keys(true))
        .await
        .context("Failed to open SQLite database")?;

    Ok(pool)
}
