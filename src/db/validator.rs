//! EXPLAIN-based SQL validation

use crate::collaborators::{SqlValidator, ValidationReport};
use crate::db::{postgres, sqlite};
use crate::schema::{DbInfo, DbKind};
use async_trait::async_trait;
use sqlx::Row;
use std::path::PathBuf;
use tracing::debug;

/// Asks the database to plan the query without running it.
#[derive(Debug, Clone, Default)]
pub struct ExplainValidator;

impl ExplainValidator {
    async fn explain_postgres(query: &str, url: &str) -> ValidationReport {
        let pool = match postgres::connect(url).await {
            Ok(pool) => pool,
            Err(e) => return ValidationReport::failed(e.to_string()),
        };
        let result = sqlx::query(&format!("EXPLAIN {}", query)).fetch_all(&pool).await;
        pool.close().await;

        match result {
            Ok(rows) => ValidationReport::ok(
                rows.iter()
                    .filter_map(|row| row.try_get::<String, _>(0).ok())
                    .collect(),
            ),
            Err(e) => ValidationReport::failed(e.to_string()),
        }
    }

    fn explain_sqlite(query: &str, path: PathBuf) -> ValidationReport {
        let conn = match sqlite::open(&path) {
            Ok(conn) => conn,
            Err(e) => return ValidationReport::failed(e.to_string()),
        };
        let mut stmt = match conn.prepare(&format!("EXPLAIN QUERY PLAN {}", query)) {
            Ok(stmt) => stmt,
            Err(e) => return ValidationReport::failed(e.to_string()),
        };
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(3))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>());
        match rows {
            Ok(lines) => ValidationReport::ok(lines),
            Err(e) => ValidationReport::failed(e.to_string()),
        }
    }
}

#[async_trait]
impl SqlValidator for ExplainValidator {
    async fn validate(&self, query: &str, db_info: &DbInfo) -> ValidationReport {
        debug!("Validating query against {:?}", db_info.kind);
        match db_info.kind {
            DbKind::Postgresql => Self::explain_postgres(query, &db_info.connection).await,
            DbKind::Sqlite => {
                let query = query.to_string();
                let path = PathBuf::from(&db_info.connection);
                tokio::task::spawn_blocking(move || Self::explain_sqlite(&query, path))
                    .await
                    .unwrap_or_else(|e| ValidationReport::failed(format!("Validator task failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::tests::school_db;

    fn sqlite_info(path: &std::path::Path) -> DbInfo {
        DbInfo {
            kind: DbKind::Sqlite,
            connection: path.display().to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_sqlite_query() {
        let path = school_db("validate_ok");
        let report = ExplainValidator
            .validate(
                r#"SELECT "score" FROM "grades" JOIN "students" ON grades."student_id" = students."id";"#,
                &sqlite_info(&path),
            )
            .await;
        std::fs::remove_file(&path).ok();
        assert!(report.valid, "{:?}", report.error);
        assert!(!report.explain_output.is_empty());
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn test_invalid_sqlite_query() {
        let path = school_db("validate_bad");
        let report = ExplainValidator
            .validate("SELECT UNKNOWN_COLUMN FROM \"grades\";", &sqlite_info(&path))
            .await;
        std::fs::remove_file(&path).ok();
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("UNKNOWN_COLUMN"));
    }
}
