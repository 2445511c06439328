//! PostgreSQL schema introspection using sqlx

use crate::error::{Result, SketchError};
use crate::schema::{DbInfo, DbKind, ForeignKey, LoadedSchema, SchemaSnapshot};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
        .map_err(|e| SketchError::Database(format!("Failed to connect to PostgreSQL: {}", e)))
}

/// Load tables, columns and foreign keys of the `public` schema.
pub async fn load_schema(database_url: &str) -> Result<LoadedSchema> {
    let pool = connect(database_url).await?;
    let snapshot = load_snapshot(&pool).await;
    pool.close().await;
    let snapshot = snapshot?;

    info!(
        "Loaded PostgreSQL schema: {} tables, {} foreign keys",
        snapshot.tables.len(),
        snapshot.foreign_keys.len()
    );
    Ok(LoadedSchema {
        snapshot,
        db_info: DbInfo {
            kind: DbKind::Postgresql,
            connection: database_url.to_string(),
        },
    })
}

async fn load_snapshot(pool: &PgPool) -> Result<SchemaSnapshot> {
    let table_rows = sqlx::query(
        r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
        ORDER BY table_name
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| SketchError::Database(format!("Failed to load tables: {}", e)))?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in &table_rows {
        tables.push(get_text(row, "table_name")?);
    }

    let mut columns = BTreeMap::new();
    for table in &tables {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| SketchError::Database(format!("Failed to load columns of {}: {}", table, e)))?;

        let names = rows
            .iter()
            .map(|row| get_text(row, "column_name"))
            .collect::<Result<Vec<_>>>()?;
        columns.insert(table.clone(), names);
    }

    let fk_rows = sqlx::query(
        r#"
        SELECT
            tc.table_name::text AS from_table,
            kcu.column_name::text AS from_column,
            ccu.table_name::text AS to_table,
            ccu.column_name::text AS to_column
        FROM information_schema.table_constraints AS tc
        JOIN information_schema.key_column_usage AS kcu
          ON tc.constraint_name = kcu.constraint_name
         AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage AS ccu
          ON ccu.constraint_name = tc.constraint_name
         AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public'
        ORDER BY tc.table_name, kcu.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| SketchError::Database(format!("Failed to load foreign keys: {}", e)))?;

    let mut foreign_keys = Vec::with_capacity(fk_rows.len());
    for row in &fk_rows {
        foreign_keys.push(ForeignKey {
            from_table: get_text(row, "from_table")?,
            from_column: get_text(row, "from_column")?,
            to_table: get_text(row, "to_table")?,
            to_column: get_text(row, "to_column")?,
        });
    }

    Ok(SchemaSnapshot::new(tables, columns, foreign_keys))
}

fn get_text(row: &sqlx::postgres::PgRow, column: &str) -> Result<String> {
    row.try_get::<String, _>(column)
        .map_err(|e| SketchError::Database(format!("Failed to read {}: {}", column, e)))
}
