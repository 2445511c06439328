//! SQLite schema introspection using rusqlite

use crate::error::{Result, SketchError};
use crate::formatter::quote_identifier;
use crate::schema::{DbInfo, DbKind, ForeignKey, LoadedSchema, SchemaSnapshot};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> SketchError + '_ {
    move |e| SketchError::Database(format!("{}: {}", context, e))
}

pub fn open(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(SketchError::Database(format!("SQLite database not found: {}", path.display())));
    }
    Connection::open(path).map_err(db_err("Failed to open SQLite database"))
}

pub fn load_schema(path: &Path) -> Result<LoadedSchema> {
    let conn = open(path)?;
    let snapshot = load_snapshot(&conn)?;
    info!(
        "Loaded SQLite schema from {}: {} tables, {} foreign keys",
        path.display(),
        snapshot.tables.len(),
        snapshot.foreign_keys.len()
    );
    Ok(LoadedSchema {
        snapshot,
        db_info: DbInfo {
            kind: DbKind::Sqlite,
            connection: path.display().to_string(),
        },
    })
}

pub fn load_snapshot(conn: &Connection) -> Result<SchemaSnapshot> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .map_err(db_err("Failed to list tables"))?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(db_err("Failed to list tables"))?;

    let mut columns = BTreeMap::new();
    // Primary key columns per table, in key order.
    let mut primary_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for table in &tables {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .map_err(db_err("Failed to read table info"))?;
        let info = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(db_err("Failed to read table info"))?;

        let mut keyed: Vec<(i64, String)> = info
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(name, pk)| (*pk, name.clone()))
            .collect();
        keyed.sort();
        primary_keys.insert(table.clone(), keyed.into_iter().map(|(_, name)| name).collect());
        columns.insert(table.clone(), info.into_iter().map(|(name, _)| name).collect::<Vec<_>>());
    }

    let mut foreign_keys = Vec::new();
    for table in &tables {
        let mut stmt = conn
            .prepare(&format!("PRAGMA foreign_key_list({})", quote_identifier(table)))
            .map_err(db_err("Failed to read foreign keys"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(db_err("Failed to read foreign keys"))?;

        for (seq, to_table, from_column, to_column) in rows {
            // A NULL target column means the parent's primary key.
            let to_column = to_column.or_else(|| {
                let index = usize::try_from(seq).ok()?;
                primary_keys.get(&to_table)?.get(index).cloned()
            });
            let Some(to_column) = to_column else {
                warn!("Skipping foreign key {}.{} -> {}: parent has no primary key", table, from_column, to_table);
                continue;
            };
            foreign_keys.push(ForeignKey {
                from_table: table.clone(),
                from_column,
                to_table,
                to_column,
            });
        }
    }

    Ok(SchemaSnapshot::new(tables, columns, foreign_keys))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Create a small students/grades/courses database on disk.
    pub(crate) fn school_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("sketcher_{}_{}.db", name, std::process::id()));
        std::fs::remove_file(&path).ok();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT);
            CREATE TABLE courses (id INTEGER PRIMARY KEY, title TEXT);
            CREATE TABLE grades (
                student_id INTEGER REFERENCES students(id),
                course_id INTEGER REFERENCES courses(id),
                score REAL
            );
            "#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_load_schema() {
        let path = school_db("load");
        let loaded = load_schema(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let snapshot = loaded.snapshot;
        assert_eq!(snapshot.tables, vec!["courses", "grades", "students"]);
        assert_eq!(snapshot.columns_of("grades"), ["student_id", "course_id", "score"]);
        assert_eq!(snapshot.foreign_keys.len(), 2);
        assert!(snapshot.foreign_keys.contains(&ForeignKey {
            from_table: "grades".into(),
            from_column: "student_id".into(),
            to_table: "students".into(),
            to_column: "id".into(),
        }));
        assert_eq!(loaded.db_info.kind, DbKind::Sqlite);
    }

    #[test]
    fn test_implicit_foreign_key_target_is_primary_key() {
        let path = std::env::temp_dir().join(format!("sketcher_implicit_fk_{}.db", std::process::id()));
        std::fs::remove_file(&path).ok();
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                r#"
                CREATE TABLE singer (singer_id INTEGER PRIMARY KEY, name TEXT);
                CREATE TABLE song (song_id INTEGER PRIMARY KEY, singer INTEGER REFERENCES singer, title TEXT);
                CREATE TABLE note (body TEXT, owner TEXT REFERENCES nokey);
                CREATE TABLE nokey (label TEXT);
                "#,
            )
            .unwrap();
        let loaded = load_schema(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            loaded.snapshot.foreign_keys,
            vec![ForeignKey {
                from_table: "song".into(),
                from_column: "singer".into(),
                to_table: "singer".into(),
                to_column: "singer_id".into(),
            }]
        );
    }

    #[test]
    fn test_missing_database() {
        let path = std::env::temp_dir().join("sketcher_does_not_exist.db");
        assert!(matches!(load_schema(&path), Err(SketchError::Database(_))));
    }
}
