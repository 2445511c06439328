//! Live database access
//!
//! Schema introspection for PostgreSQL (sqlx) and SQLite (rusqlite), and the
//! EXPLAIN-based validator. `DATABASE_URL` values starting with `sqlite:`
//! select SQLite; anything else is treated as a PostgreSQL URL.

pub mod postgres;
pub mod sqlite;
pub mod validator;

pub use validator::ExplainValidator;

use crate::error::{Result, SketchError};
use crate::schema::LoadedSchema;
use std::path::PathBuf;

/// SQLite file path for a `sqlite:` URL, `None` for anything else.
pub fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .map(PathBuf::from)
}

/// Introspect the database behind `database_url`. A database without
/// tables is an error; nothing could be generated against it.
pub async fn load_schema(database_url: &str) -> Result<LoadedSchema> {
    let loaded = match sqlite_path(database_url) {
        Some(path) => tokio::task::spawn_blocking(move || sqlite::load_schema(&path))
            .await
            .map_err(|e| SketchError::Database(format!("Schema loader task failed: {}", e)))??,
        None => postgres::load_schema(database_url).await?,
    };
    if loaded.snapshot.tables.is_empty() {
        return Err(SketchError::Schema(format!("No tables found in {:?} database", loaded.db_info.kind)));
    }
    Ok(loaded)
}
