//! SQLite-backed [`StorageAdapter`].
//!
//! Layout (see [`crate::migrate`]):
//!
//! | Table | Holds |
//! |-------|-------|
//! | `sources` | one row per original content unit, full text stored once |
//! | `documents` | chunk rows; `source_id` references `sources` with `ON DELETE CASCADE` |
//! | `vec_documents` | fixed-width little-endian `f32` embeddings keyed by `vec_rowid` |
//! | `source_extensions` / `extension_stats` | analytical per-extension aggregates |
//! | `index_meta` | the dimension the database was created with |
//!
//! Every insert is one transaction: the source row (when chunk 0 carries
//! `originalContent`), the vector row and the document row commit together,
//! so a concurrent search never sees a document without its vector.
//! Deletes are likewise one transaction that removes the document, its
//! vector, and its source when no other document references it. Writes are
//! serialized through an async mutex; reads go straight to the pool.
//!
//! Similarity is computed in Rust over `(id, embedding)` pairs read in
//! `vec_rowid` order, so ties resolve in insertion order. Only the top `k`
//! rows are then hydrated into full documents.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use semindex_core::embedding::{blob_to_vec, cosine_similarity, validate_dimension, vec_to_blob};
use semindex_core::models::{
    extension_of, ChunkMetadata, Document, DocumentFilter, DocumentUpdate, ExtensionStat,
    ListOptions, NewDocument, ScoredDocument, SearchOptions, Source, SourceType,
};
use semindex_core::store::{
    generate_id, strip_original_content,
    AdapterConfig, AdapterInfo, StorageAdapter,
};
use semindex_core::{IndexError, Result as IndexResult};

use crate::{db, migrate};

pub const PROVIDER: &str = "sqlite";

const SELECT_DOCUMENTS: &str = r#"
    SELECT d.id, d.source_id, d.content, d.metadata, d.holds_original,
           d.created_at, d.updated_at, v.embedding,
           CASE WHEN d.holds_original = 1 THEN s.original_content END AS source_content
    FROM documents d
    JOIN vec_documents v ON v.vec_rowid = d.vec_rowid
    LEFT JOIN sources s ON s.source_id = d.source_id
"#;

#[derive(Clone)]
struct OpenState {
    pool: SqlitePool,
    dimension: usize,
}

/// SQLite implementation of the [`StorageAdapter`] trait.
pub struct SqliteAdapter {
    state: RwLock<Option<OpenState>>,
    write_lock: Mutex<()>,
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    fn open_state(&self) -> IndexResult<OpenState> {
        self.state.read().clone().ok_or(IndexError::NotInitialized)
    }

    /// Remove sources no document references. Safe to run any number of
    /// times; finishes a cascade interrupted by a crash.
    async fn sweep_orphan_sources(pool: &SqlitePool) -> Result<usize> {
        let orphans: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT s.source_id FROM sources s
            WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.source_id = s.source_id)
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut removed = 0;
        for source_id in orphans {
            let mut tx = pool.begin().await?;
            if release_source(&mut tx, &source_id).await? {
                removed += 1;
            }
            tx.commit().await?;
        }
        Ok(removed)
    }

    async fn delete_one(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT source_id, vec_rowid FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let source_id: Option<String> = row.get("source_id");
        let vec_rowid: i64 = row.get("vec_rowid");

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM vec_documents WHERE vec_rowid = ?")
            .bind(vec_rowid)
            .execute(&mut *conn)
            .await?;
        if let Some(sid) = source_id {
            release_source(conn, &sid).await?;
        }
        Ok(true)
    }
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an internal error into the shared taxonomy, keeping typed
/// errors raised inside a transaction intact.
fn backend_err(operation: &'static str) -> impl Fn(anyhow::Error) -> IndexError {
    move |err| match err.downcast::<IndexError>() {
        Ok(inner) => inner,
        Err(other) => IndexError::backend(operation, format!("{:#}", other)),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata");
    let mut metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
    let holds_original: i64 = row.get("holds_original");
    let source_content: Option<String> = row.get("source_content");
    if holds_original != 0 {
        if let Some(content) = source_content {
            metadata.original_content = Some(content);
        }
    }
    let blob: Vec<u8> = row.get("embedding");
    Ok(Document {
        id: row.get("id"),
        source_id: row.get("source_id"),
        content: row.get("content"),
        metadata,
        embedding: blob_to_vec(&blob),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn row_to_source(row: &SqliteRow) -> Source {
    let source_type: String = row.get("source_type");
    Source {
        source_id: row.get("source_id"),
        original_content: row.get("original_content"),
        title: row.get("title"),
        url: row.get("url"),
        source_type: source_type.parse().unwrap_or(SourceType::Text),
        created_at: from_millis(row.get("created_at")),
    }
}

async fn fetch_source(conn: &mut SqliteConnection, source_id: &str) -> Result<Option<Source>> {
    let row = sqlx::query(
        "SELECT source_id, original_content, title, url, source_type, created_at FROM sources WHERE source_id = ?",
    )
    .bind(source_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(row_to_source))
}

/// Create the source row this chunk carries, if any, then resolve the
/// source the document links to and move `originalContent` into it.
/// Returns `(linked_source_id, holds_original)`.
async fn attach_source(
    conn: &mut SqliteConnection,
    metadata: &mut ChunkMetadata,
    now: i64,
) -> Result<(Option<String>, bool)> {
    if let Some(source) = Source::from_metadata(metadata, from_millis(now)) {
        let created = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sources (source_id, original_content, title, url, source_type, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.source_id)
        .bind(&source.original_content)
        .bind(&source.title)
        .bind(&source.url)
        .bind(source.source_type.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            == 1;
        if created {
            record_extension(conn, &source).await?;
        }
    }

    let Some(sid) = metadata.source_id.clone() else {
        return Ok((None, false));
    };
    let source = fetch_source(conn, &sid).await?;
    let holds_original = strip_original_content(metadata, source.as_ref());
    Ok((source.map(|s| s.source_id), holds_original))
}

async fn record_extension(conn: &mut SqliteConnection, source: &Source) -> Result<()> {
    let Some(ext) = source.url.as_deref().and_then(extension_of) else {
        return Ok(());
    };
    let bytes = source.original_content.len() as i64;
    sqlx::query("INSERT INTO source_extensions (source_id, extension, bytes) VALUES (?, ?, ?)")
        .bind(&source.source_id)
        .bind(&ext)
        .bind(bytes)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO extension_stats (extension, source_count, total_bytes) VALUES (?, 1, ?)
        ON CONFLICT(extension) DO UPDATE SET
            source_count = source_count + 1,
            total_bytes = total_bytes + excluded.total_bytes
        "#,
    )
    .bind(&ext)
    .bind(bytes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete `source_id` if no document references it, reversing its
/// extension statistics. Returns whether a row was removed.
async fn release_source(conn: &mut SqliteConnection, source_id: &str) -> Result<bool> {
    let referenced: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM documents WHERE source_id = ?)")
            .bind(source_id)
            .fetch_one(&mut *conn)
            .await?;
    if referenced {
        return Ok(false);
    }

    let ext_row = sqlx::query("SELECT extension, bytes FROM source_extensions WHERE source_id = ?")
        .bind(source_id)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = ext_row {
        let ext: String = row.get("extension");
        let bytes: i64 = row.get("bytes");
        sqlx::query(
            "UPDATE extension_stats SET source_count = source_count - 1, total_bytes = total_bytes - ? WHERE extension = ?",
        )
        .bind(bytes)
        .bind(&ext)
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM extension_stats WHERE extension = ? AND source_count <= 0")
            .bind(&ext)
            .execute(&mut *conn)
            .await?;
    }

    let removed = sqlx::query(
        r#"
        DELETE FROM sources
        WHERE source_id = ?
          AND NOT EXISTS (SELECT 1 FROM documents WHERE source_id = ?)
        "#,
    )
    .bind(source_id)
    .bind(source_id)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;
    if removed {
        debug!(source_id, "removed source with no remaining chunks");
    }
    Ok(removed)
}

async fn insert_one(
    conn: &mut SqliteConnection,
    doc: NewDocument,
    now: i64,
) -> Result<String> {
    let id = doc.id.unwrap_or_else(generate_id);
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM documents WHERE id = ?)")
        .bind(&id)
        .fetch_one(&mut *conn)
        .await?;
    if exists {
        return Err(IndexError::Validation(format!("document id already exists: {}", id)).into());
    }

    let mut metadata = doc.metadata;
    let (source_id, holds_original) = attach_source(conn, &mut metadata, now).await?;

    let vec_rowid = sqlx::query("INSERT INTO vec_documents (embedding) VALUES (?)")
        .bind(vec_to_blob(&doc.embedding))
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    sqlx::query(
        r#"
        INSERT INTO documents (id, source_id, content, metadata, vec_rowid, holds_original, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&source_id)
    .bind(&doc.content)
    .bind(serde_json::to_string(&metadata)?)
    .bind(vec_rowid)
    .bind(holds_original as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
}

/// Build a `WHERE` clause for `filter`. Metadata keys are validated to be
/// plain identifiers before being spliced into a JSON path.
fn filter_clause(filter: Option<&DocumentFilter>) -> IndexResult<(String, Vec<BindValue>)> {
    let Some(filter) = filter else {
        return Ok((String::new(), Vec::new()));
    };
    filter.validate()?;

    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    if let Some(st) = filter.source_type {
        clauses.push("json_extract(d.metadata, '$.sourceType') = ?".to_string());
        binds.push(BindValue::Text(st.as_str().to_string()));
    }
    if let Some(ref sid) = filter.source_id {
        clauses.push(
            "(d.source_id = ? OR json_extract(d.metadata, '$.sourceId') = ?)".to_string(),
        );
        binds.push(BindValue::Text(sid.clone()));
        binds.push(BindValue::Text(sid.clone()));
    }
    for (key, value) in &filter.metadata {
        let path = format!("json_extract(d.metadata, '$.\"{}\"')", key);
        match value {
            Value::Null => clauses.push(format!("{} IS NULL", path)),
            Value::Bool(b) => {
                clauses.push(format!("{} = ?", path));
                binds.push(BindValue::Int(*b as i64));
            }
            Value::Number(n) => {
                clauses.push(format!("{} = ?", path));
                match n.as_i64() {
                    Some(i) => binds.push(BindValue::Int(i)),
                    None => binds.push(BindValue::Float(n.as_f64().unwrap_or(0.0))),
                }
            }
            Value::String(s) => {
                clauses.push(format!("{} = ?", path));
                binds.push(BindValue::Text(s.clone()));
            }
            other => {
                clauses.push(format!("{} = json(?)", path));
                binds.push(BindValue::Text(other.to_string()));
            }
        }
    }

    if clauses.is_empty() {
        return Ok((String::new(), binds));
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in binds {
        query = match value {
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Float(f) => query.bind(*f),
        };
    }
    query
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn initialize(&self, config: &AdapterConfig) -> IndexResult<()> {
        let dimension = config.options.dimension;
        if dimension == 0 {
            return Err(IndexError::Configuration(
                "dimension must be greater than zero".into(),
            ));
        }
        let existing = self.state.read().as_ref().map(|s| s.dimension);
        if let Some(open_dimension) = existing {
            if open_dimension != dimension {
                return Err(IndexError::Configuration(format!(
                    "adapter already open with dimension {}",
                    open_dimension
                )));
            }
            return Ok(());
        }

        let path = config.options.path.as_deref().map(Path::new);
        let pool = db::connect(path).await.map_err(backend_err("connect"))?;
        migrate::run_migrations(&pool, dimension)
            .await
            .map_err(backend_err("migrate"))?;
        let swept = Self::sweep_orphan_sources(&pool)
            .await
            .map_err(backend_err("orphan sweep"))?;
        if swept > 0 {
            info!(swept, "removed orphaned sources");
        }

        *self.state.write() = Some(OpenState { pool, dimension });
        debug!(path = ?config.options.path, dimension, "sqlite adapter open");
        Ok(())
    }

    async fn close(&self) -> IndexResult<()> {
        let open = self.state.write().take();
        if let Some(open) = open {
            open.pool.close().await;
        }
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.state.read().as_ref().map(|s| s.dimension)
    }

    async fn insert(&self, doc: NewDocument) -> IndexResult<String> {
        let open = self.open_state()?;
        validate_dimension(open.dimension, &doc.embedding)?;
        let _guard = self.write_lock.lock().await;
        async {
            let mut tx = open.pool.begin().await?;
            let id = insert_one(&mut tx, doc, now_millis()).await?;
            tx.commit().await?;
            Ok::<_, anyhow::Error>(id)
        }
        .await
        .map_err(backend_err("insert"))
    }

    async fn insert_batch(&self, docs: Vec<NewDocument>) -> IndexResult<Vec<String>> {
        let open = self.open_state()?;
        for doc in &docs {
            validate_dimension(open.dimension, &doc.embedding)?;
        }
        let _guard = self.write_lock.lock().await;
        async {
            let mut tx = open.pool.begin().await?;
            let now = now_millis();
            let mut ids = Vec::with_capacity(docs.len());
            for doc in docs {
                ids.push(insert_one(&mut tx, doc, now).await?);
            }
            tx.commit().await?;
            Ok::<_, anyhow::Error>(ids)
        }
        .await
        .map_err(backend_err("insert batch"))
    }

    async fn get(&self, id: &str) -> IndexResult<Option<Document>> {
        let open = self.open_state()?;
        async {
            let sql = format!("{} WHERE d.id = ?", SELECT_DOCUMENTS);
            let row = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&open.pool)
                .await?;
            row.as_ref().map(row_to_document).transpose()
        }
        .await
        .map_err(backend_err("get"))
    }

    async fn update(&self, id: &str, update: DocumentUpdate) -> IndexResult<Document> {
        let open = self.open_state()?;
        if let Some(ref embedding) = update.embedding {
            validate_dimension(open.dimension, embedding)?;
        }
        let _guard = self.write_lock.lock().await;
        async {
            let mut tx = open.pool.begin().await?;
            let row = sqlx::query("SELECT source_id, vec_rowid FROM documents WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| IndexError::DocumentNotFound(id.to_string()))?;
            let old_source: Option<String> = row.get("source_id");
            let vec_rowid: i64 = row.get("vec_rowid");
            let now = now_millis();

            if let Some(content) = update.content {
                sqlx::query("UPDATE documents SET content = ? WHERE id = ?")
                    .bind(content)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(mut metadata) = update.metadata {
                let (source_id, holds_original) = attach_source(&mut tx, &mut metadata, now).await?;
                sqlx::query(
                    "UPDATE documents SET metadata = ?, source_id = ?, holds_original = ? WHERE id = ?",
                )
                .bind(serde_json::to_string(&metadata)?)
                .bind(&source_id)
                .bind(holds_original as i64)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if let Some(old) = old_source.filter(|old| Some(old) != source_id.as_ref()) {
                    release_source(&mut tx, &old).await?;
                }
            }
            if let Some(embedding) = update.embedding {
                sqlx::query("UPDATE vec_documents SET embedding = ? WHERE vec_rowid = ?")
                    .bind(vec_to_blob(&embedding))
                    .bind(vec_rowid)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("UPDATE documents SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;

            let sql = format!("{} WHERE d.id = ?", SELECT_DOCUMENTS);
            let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
            let doc = row_to_document(&row)?;
            tx.commit().await?;
            Ok::<_, anyhow::Error>(doc)
        }
        .await
        .map_err(backend_err("update"))
    }

    async fn delete(&self, id: &str) -> IndexResult<()> {
        let open = self.open_state()?;
        let _guard = self.write_lock.lock().await;
        async {
            let mut tx = open.pool.begin().await?;
            if !Self::delete_one(&mut tx, id).await? {
                return Err(IndexError::DocumentNotFound(id.to_string()).into());
            }
            tx.commit().await?;
            Ok::<_, anyhow::Error>(())
        }
        .await
        .map_err(backend_err("delete"))
    }

    async fn delete_batch(&self, ids: &[String]) -> IndexResult<usize> {
        let open = self.open_state()?;
        let _guard = self.write_lock.lock().await;
        async {
            let mut tx = open.pool.begin().await?;
            let mut removed = 0;
            for id in ids {
                if Self::delete_one(&mut tx, id).await? {
                    removed += 1;
                }
            }
            tx.commit().await?;
            Ok::<_, anyhow::Error>(removed)
        }
        .await
        .map_err(backend_err("delete batch"))
    }

    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> IndexResult<Vec<ScoredDocument>> {
        let open = self.open_state()?;
        validate_dimension(open.dimension, embedding)?;
        let (where_sql, binds) = filter_clause(options.filter.as_ref())?;
        async {
            let sql = format!(
                r#"SELECT d.id, v.embedding FROM documents d
                JOIN vec_documents v ON v.vec_rowid = d.vec_rowid{} ORDER BY d.vec_rowid ASC"#,
                where_sql
            );
            let rows = bind_all(sqlx::query(&sql), &binds)
                .fetch_all(&open.pool)
                .await?;
            let mut ranked: Vec<(String, f64)> = rows
                .iter()
                .map(|row| {
                    let blob: Vec<u8> = row.get("embedding");
                    let score = cosine_similarity(embedding, &blob_to_vec(&blob)) as f64;
                    (row.get("id"), score)
                })
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
            ranked.truncate(options.k);

            let sql = format!("{} WHERE d.id = ?", SELECT_DOCUMENTS);
            let mut conn = open.pool.acquire().await?;
            let mut hits = Vec::with_capacity(ranked.len());
            for (id, score) in ranked {
                // A concurrent delete may have removed the row since ranking.
                if let Some(row) = sqlx::query(&sql).bind(&id).fetch_optional(&mut *conn).await? {
                    hits.push(ScoredDocument {
                        document: row_to_document(&row)?,
                        score,
                    });
                }
            }
            Ok::<_, anyhow::Error>(hits)
        }
        .await
        .map_err(backend_err("search"))
    }

    async fn count(&self, filter: Option<&DocumentFilter>) -> IndexResult<usize> {
        let open = self.open_state()?;
        let (where_sql, binds) = filter_clause(filter)?;
        async {
            let sql = format!("SELECT COUNT(*) AS n FROM documents d{}", where_sql);
            let row = bind_all(sqlx::query(&sql), &binds)
                .fetch_one(&open.pool)
                .await?;
            let n: i64 = row.get("n");
            Ok::<_, anyhow::Error>(n as usize)
        }
        .await
        .map_err(backend_err("count"))
    }

    async fn list(&self, options: &ListOptions) -> IndexResult<Vec<Document>> {
        let open = self.open_state()?;
        let (where_sql, binds) = filter_clause(options.filter.as_ref())?;
        let limit = options.limit.map(|l| l as i64).unwrap_or(-1);
        async {
            let sql = format!(
                "{}{} ORDER BY d.created_at DESC, d.vec_rowid DESC LIMIT ? OFFSET ?",
                SELECT_DOCUMENTS, where_sql
            );
            let rows = bind_all(sqlx::query(&sql), &binds)
                .bind(limit)
                .bind(options.offset as i64)
                .fetch_all(&open.pool)
                .await?;
            rows.iter().map(row_to_document).collect::<Result<Vec<_>>>()
        }
        .await
        .map_err(backend_err("list"))
    }

    async fn get_source(&self, source_id: &str) -> IndexResult<Option<Source>> {
        let open = self.open_state()?;
        async {
            let mut conn = open.pool.acquire().await?;
            fetch_source(&mut conn, source_id).await
        }
        .await
        .map_err(backend_err("get source"))
    }

    async fn list_sources(&self) -> IndexResult<Vec<Source>> {
        let open = self.open_state()?;
        async {
            let rows = sqlx::query(
                "SELECT source_id, original_content, title, url, source_type, created_at FROM sources ORDER BY created_at, source_id",
            )
            .fetch_all(&open.pool)
            .await?;
            Ok::<_, anyhow::Error>(rows.iter().map(row_to_source).collect())
        }
        .await
        .map_err(backend_err("list sources"))
    }

    async fn extension_stats(&self) -> IndexResult<Vec<ExtensionStat>> {
        let open = self.open_state()?;
        async {
            let rows = sqlx::query(
                "SELECT extension, source_count, total_bytes FROM extension_stats ORDER BY extension",
            )
            .fetch_all(&open.pool)
            .await?;
            Ok::<_, anyhow::Error>(rows
                .iter()
                .map(|row| ExtensionStat {
                    extension: row.get("extension"),
                    source_count: row.get("source_count"),
                    total_bytes: row.get("total_bytes"),
                })
                .collect())
        }
        .await
        .map_err(backend_err("extension stats"))
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(
            PROVIDER,
            &[
                "vector_search",
                "metadata_filter",
                "sources",
                "persistence",
                "transactions",
                "extension_stats",
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dim: usize) -> SqliteAdapter {
        let adapter = SqliteAdapter::new();
        adapter
            .initialize(&AdapterConfig::new(PROVIDER, dim))
            .await
            .unwrap();
        adapter
    }

    fn file_chunk(source: &str, index: usize, path: &str, embedding: Vec<f32>) -> NewDocument {
        NewDocument {
            id: None,
            content: format!("{} chunk {}", source, index),
            metadata: ChunkMetadata {
                source_id: Some(source.into()),
                source_type: Some(SourceType::File),
                chunk_index: Some(index),
                file_path: Some(path.into()),
                original_content: (index == 0).then(|| "0123456789".to_string()),
                ..Default::default()
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_original_content_stored_once_and_restored() {
        let adapter = open(2).await;
        let id = adapter
            .insert(file_chunk("s1", 0, "a.md", vec![1.0, 0.0]))
            .await
            .unwrap();
        let open_state = adapter.open_state().unwrap();
        let raw: String = sqlx::query_scalar("SELECT metadata FROM documents WHERE id = ?")
            .bind(&id)
            .fetch_one(&open_state.pool)
            .await
            .unwrap();
        assert!(!raw.contains("originalContent"));

        let doc = adapter.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.metadata.original_content.as_deref(), Some("0123456789"));
        assert_eq!(doc.source_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_only_the_owning_chunk_carries_original_content() {
        let adapter = open(2).await;
        let first = adapter
            .insert(file_chunk("s1", 0, "a.md", vec![1.0, 0.0]))
            .await
            .unwrap();
        let second = adapter
            .insert(file_chunk("s1", 1, "a.md", vec![0.6, 0.8]))
            .await
            .unwrap();
        adapter
            .insert(file_chunk("s1", 2, "a.md", vec![0.0, 1.0]))
            .await
            .unwrap();

        let doc = adapter.get(&second).await.unwrap().unwrap();
        assert_eq!(doc.metadata.original_content, None);

        let hits = adapter
            .search(&[1.0, 0.0], &SearchOptions { k: 2, filter: None })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, first);
        assert_eq!(
            hits[0].document.metadata.original_content.as_deref(),
            Some("0123456789")
        );
        assert_eq!(hits[1].document.id, second);
        assert_eq!(hits[1].document.metadata.original_content, None);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_extension_stats_follow_sources() {
        let adapter = open(2).await;
        let a = adapter
            .insert(file_chunk("s1", 0, "docs/a.md", vec![1.0, 0.0]))
            .await
            .unwrap();
        adapter
            .insert(file_chunk("s2", 0, "docs/b.MD", vec![0.0, 1.0]))
            .await
            .unwrap();
        let stats = adapter.extension_stats().await.unwrap();
        assert_eq!(
            stats,
            vec![ExtensionStat {
                extension: "md".into(),
                source_count: 2,
                total_bytes: 20,
            }]
        );

        adapter.delete(&a).await.unwrap();
        let stats = adapter.extension_stats().await.unwrap();
        assert_eq!(stats[0].source_count, 1);
        assert_eq!(stats[0].total_bytes, 10);
    }

    #[tokio::test]
    async fn test_orphan_sweep_on_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        let config = AdapterConfig::new(PROVIDER, 2).with_path(path.to_string_lossy());

        let adapter = SqliteAdapter::new();
        adapter.initialize(&config).await.unwrap();
        let pool = adapter.open_state().unwrap().pool;
        // Simulate a cascade interrupted after the document was removed.
        sqlx::query(
            "INSERT INTO sources (source_id, original_content, source_type, created_at) VALUES ('orphan', 'x', 'text', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        adapter.close().await.unwrap();

        let reopened = SqliteAdapter::new();
        reopened.initialize(&config).await.unwrap();
        assert!(reopened.get_source("orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        let adapter = SqliteAdapter::new();
        adapter
            .initialize(&AdapterConfig::new(PROVIDER, 2).with_path(path.to_string_lossy()))
            .await
            .unwrap();
        adapter.close().await.unwrap();

        let err = SqliteAdapter::new()
            .initialize(&AdapterConfig::new(PROVIDER, 3).with_path(path.to_string_lossy()))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_metadata_filter_types() {
        let adapter = open(2).await;
        let mut doc = file_chunk("s1", 1, "a.rs", vec![1.0, 0.0]);
        doc.metadata.extra.insert("reviewed".into(), Value::Bool(true));
        doc.metadata.extra.insert("stars".into(), serde_json::json!(5));
        adapter.insert(doc).await.unwrap();
        adapter
            .insert(file_chunk("s1", 2, "a.rs", vec![0.0, 1.0]))
            .await
            .unwrap();

        let reviewed = DocumentFilter::default().with_metadata("reviewed", Value::Bool(true));
        assert_eq!(adapter.count(Some(&reviewed)).await.unwrap(), 1);
        let stars = DocumentFilter::default().with_metadata("stars", serde_json::json!(5));
        assert_eq!(adapter.count(Some(&stars)).await.unwrap(), 1);
        let by_source = DocumentFilter::source_id("s1");
        assert_eq!(adapter.count(Some(&by_source)).await.unwrap(), 2);
        let bad = DocumentFilter::default().with_metadata("x') OR 1=1 --", Value::Null);
        assert!(adapter.count(Some(&bad)).await.unwrap_err().is_validation());
    }
}
