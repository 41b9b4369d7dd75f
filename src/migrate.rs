//! Schema creation for the `sqlite` storage adapter.
//!
//! All statements are `CREATE ... IF NOT EXISTS`, so running them against
//! an existing database is a no-op. The vector table's width is fixed at
//! creation by a `CHECK` constraint and recorded in `index_meta`; opening
//! the database later with a different dimension is a configuration error.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use semindex_core::IndexError;

pub async fn run_migrations(pool: &SqlitePool, dimension: usize) -> Result<()> {
    // Create sources table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id TEXT PRIMARY KEY,
            original_content TEXT NOT NULL,
            title TEXT,
            url TEXT,
            source_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create fixed-width vector table; row ids are never reused
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS vec_documents (
            vec_rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            embedding BLOB NOT NULL CHECK (length(embedding) = {})
        )
        "#,
        dimension * 4
    ))
    .execute(pool)
    .await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_id TEXT REFERENCES sources(source_id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            vec_rowid INTEGER NOT NULL UNIQUE,
            holds_original INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create analytical extension tables
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_extensions (
            source_id TEXT PRIMARY KEY REFERENCES sources(source_id) ON DELETE CASCADE,
            extension TEXT NOT NULL,
            bytes INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extension_stats (
            extension TEXT PRIMARY KEY,
            source_count INTEGER NOT NULL,
            total_bytes INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_id ON documents(source_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;

    // Record or verify the dimension
    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dimension'")
            .fetch_optional(pool)
            .await?;
    match stored {
        None => {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dimension', ?)")
                .bind(dimension.to_string())
                .execute(pool)
                .await?;
            debug!(dimension, "recorded index dimension");
        }
        Some(value) if value == dimension.to_string() => {}
        Some(value) => {
            return Err(IndexError::Configuration(format!(
                "database was created with dimension {} but the adapter is configured for {}",
                value, dimension
            ))
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = crate::db::connect(None).await.unwrap();
        run_migrations(&pool, 3).await.unwrap();
        run_migrations(&pool, 3).await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec![
                "documents",
                "extension_stats",
                "index_meta",
                "source_extensions",
                "sources",
                "vec_documents"
            ]
        );
    }

    #[tokio::test]
    async fn test_dimension_change_rejected() {
        let pool = crate::db::connect(None).await.unwrap();
        run_migrations(&pool, 3).await.unwrap();
        let err = run_migrations(&pool, 4).await.unwrap_err();
        let err: IndexError = err.into();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_vector_width_enforced() {
        let pool = crate::db::connect(None).await.unwrap();
        run_migrations(&pool, 2).await.unwrap();
        let bad = sqlx::query("INSERT INTO vec_documents (embedding) VALUES (?)")
            .bind(vec![0u8; 4])
            .execute(&pool)
            .await;
        assert!(bad.is_err());
    }
}
