use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sql_sketcher::collaborators::{
    CompletionRequest, Embedder, IntentParser, JoinRequest, JoinSuggester, PlaceholderCompleter,
};
use sql_sketcher::db::{self, ExplainValidator};
use sql_sketcher::schema::{DbInfo, DbKind, LoadedSchema, SchemaSnapshot};
use sql_sketcher::template::{CatalogHandle, Embedding, Template, TemplateCatalog};
use sql_sketcher::{SketchError, SketchStatus, SqlSketcher};

/// Canned collaborator replies for one request.
struct Scripted {
    intent: Value,
    embedding: Embedding,
    completion: Value,
    join: Value,
    completion_calls: Mutex<usize>,
}

impl Scripted {
    fn new(intent: Value, embedding: Embedding) -> Self {
        Self {
            intent,
            embedding,
            completion: json!({"error": "not expected"}),
            join: json!({"error": "not expected"}),
            completion_calls: Mutex::new(0),
        }
    }

    fn completing(mut self, completion: Value) -> Self {
        self.completion = completion;
        self
    }

    fn joining(mut self, join: Value) -> Self {
        self.join = join;
        self
    }
}

#[async_trait]
impl IntentParser for Scripted {
    async fn parse(&self, _nl_text: &str, _schema: &SchemaSnapshot) -> sql_sketcher::Result<Value> {
        Ok(self.intent.clone())
    }
}

#[async_trait]
impl Embedder for Scripted {
    async fn embed(&self, _text: &str) -> sql_sketcher::Result<Embedding> {
        Ok(self.embedding.clone())
    }
}

#[async_trait]
impl PlaceholderCompleter for Scripted {
    async fn complete(&self, _request: &CompletionRequest) -> sql_sketcher::Result<Value> {
        *self.completion_calls.lock().unwrap() += 1;
        Ok(self.completion.clone())
    }
}

#[async_trait]
impl JoinSuggester for Scripted {
    async fn suggest_join(&self, _request: &JoinRequest) -> sql_sketcher::Result<Value> {
        Ok(self.join.clone())
    }
}

fn catalog() -> TemplateCatalog {
    TemplateCatalog::new(vec![
        Template::new("tpl_01", "SELECT {{column}} FROM {{table}};", vec![1.0, 0.0, 0.0]).unwrap(),
        Template::new(
            "tpl_06",
            "SELECT {{group_column}}, AVG({{column}}) FROM {{table}} GROUP BY {{group_column}};",
            vec![0.0, 1.0, 0.0],
        )
        .unwrap(),
        Template::new(
            "tpl_02",
            "SELECT {{column}} FROM {{table}} WHERE {{column}} = {{value}};",
            vec![0.0, 0.0, 1.0],
        )
        .unwrap(),
    ])
    .unwrap()
}

fn sketcher(script: Arc<Scripted>) -> SqlSketcher {
    SqlSketcher::new(
        CatalogHandle::new(catalog()),
        script.clone(),
        script.clone(),
        script.clone(),
        script,
    )
}

fn singer_schema() -> LoadedSchema {
    let mut columns = BTreeMap::new();
    columns.insert("singer".to_string(), vec!["Singer_ID".to_string(), "Name".to_string(), "Age".to_string()]);
    LoadedSchema {
        snapshot: SchemaSnapshot::new(vec!["singer".to_string()], columns, vec![]),
        db_info: DbInfo {
            kind: DbKind::Sqlite,
            connection: "unused.db".to_string(),
        },
    }
}

fn school_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("sketcher_it_{}_{}.db", name, std::process::id()));
    std::fs::remove_file(&path).ok();
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT);
        CREATE TABLE grades (
            student_id INTEGER REFERENCES students(id),
            score REAL
        );
        "#,
    )
    .unwrap();
    path
}

#[tokio::test]
async fn test_simple_select_resolves_without_enrichment() {
    let script = Arc::new(Scripted::new(
        json!({"action": "SELECT", "tables": ["singer"], "columns": ["Name"]}),
        vec![1.0, 0.0, 0.0],
    ));
    let response = sketcher(script.clone())
        .generate("show singer names", &singer_schema())
        .await
        .unwrap();

    assert_eq!(response.selected_template.template_id, "tpl_01");
    assert_eq!(response.final_query, r#"SELECT "Name" FROM "singer";"#);
    assert_eq!(response.status, SketchStatus::Resolved);
    assert!(response.missing_fields.is_empty());
    assert_eq!(response.enrichment_notes, vec!["No enrichment needed"]);
    assert_eq!(response.embedding_preview, vec![1.0, 0.0, 0.0]);
    assert_eq!(*script.completion_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_join_and_group_against_sqlite() {
    let path = school_db("join_group");
    let schema = db::load_schema(&format!("sqlite://{}", path.display())).await.unwrap();

    let script = Arc::new(Scripted::new(
        json!({
            "tables": ["grades", "students"],
            "columns": ["name"],
            "aggregations": [{"function": "AVG", "column": "score"}],
            "group_by": ["name"]
        }),
        vec![0.0, 1.0, 0.0],
    ));
    let response = sketcher(script)
        .with_validator(Arc::new(ExplainValidator))
        .generate("average score per student name", &schema)
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(response.selected_template.template_id, "tpl_06");
    assert_eq!(
        response.final_query,
        r#"SELECT "name", AVG("score") FROM "grades" JOIN "students" ON grades."student_id" = students."id" GROUP BY "name";"#
    );
    assert_eq!(response.status, SketchStatus::Resolved);
    assert!(response.enrichment_notes.iter().any(|n| n.starts_with("Join added")));
    let validation = response.validation.unwrap();
    assert!(validation.valid, "{:?}", validation.error);
}

#[tokio::test]
async fn test_missing_column_filled_by_completion() {
    let script = Arc::new(
        Scripted::new(json!({"tables": ["singer"]}), vec![1.0, 0.0, 0.0]).completing(json!({"column": "Name"})),
    );
    let response = sketcher(script.clone())
        .generate("who sings", &singer_schema())
        .await
        .unwrap();

    assert_eq!(response.missing_fields.len(), 1);
    assert_eq!(response.final_query, r#"SELECT "Name" FROM "singer";"#);
    assert_eq!(response.status, SketchStatus::Resolved);
    assert!(response.enrichment_notes.contains(&"Overrides applied: column".to_string()));
    assert_eq!(*script.completion_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_completion_timeout_keeps_sentinel() {
    let script = Arc::new(
        Scripted::new(json!({"tables": ["singer"]}), vec![1.0, 0.0, 0.0]).completing(json!({"error": "timeout"})),
    );
    let response = sketcher(script).generate("who sings", &singer_schema()).await.unwrap();

    assert_eq!(response.final_query, r#"SELECT UNKNOWN_COLUMN FROM "singer";"#);
    assert_eq!(response.status, SketchStatus::Partial);
    assert_eq!(response.unresolved_fields.len(), 1);
    assert!(response
        .enrichment_notes
        .iter()
        .any(|n| n.starts_with("Placeholder completion failed") && n.contains("timeout")));
}

#[tokio::test]
async fn test_foreign_column_joined_by_suggestion() {
    let script = Arc::new(
        Scripted::new(json!({"tables": ["singer"]}), vec![1.0, 0.0, 0.0])
            .completing(json!({"column": "\"Title\""}))
            .joining(json!({
                "join_table": "song",
                "join_condition": "singer.\"Singer_ID\" = song.\"Singer_ID\""
            })),
    );
    let response = sketcher(script).generate("song titles", &singer_schema()).await.unwrap();

    assert_eq!(
        response.final_query,
        r#"SELECT "Title" FROM "singer" JOIN "song" ON singer."Singer_ID" = song."Singer_ID";"#
    );
}

#[tokio::test]
async fn test_intent_error_short_circuits() {
    let script = Arc::new(Scripted::new(
        json!({"error": "Invalid JSON format returned by OpenAI."}),
        vec![1.0, 0.0, 0.0],
    ));
    let err = sketcher(script).generate("???", &singer_schema()).await.unwrap_err();
    assert!(matches!(err, SketchError::Intent(ref m) if m == "Invalid JSON format returned by OpenAI."));
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_fatal() {
    let script = Arc::new(Scripted::new(json!({"tables": ["singer"]}), vec![1.0, 0.0]));
    let err = sketcher(script).generate("names", &singer_schema()).await.unwrap_err();
    assert!(matches!(err, SketchError::Embedding(_)));
}

#[tokio::test]
async fn test_catalog_replacement_is_picked_up() {
    let script = Arc::new(Scripted::new(
        json!({"tables": ["singer"], "columns": ["Name"]}),
        vec![1.0, 0.0, 0.0],
    ));
    let sketcher = sketcher(script);
    let replacement = TemplateCatalog::new(vec![Template::new(
        "tpl_custom",
        "SELECT DISTINCT {{column}} FROM {{table}};",
        vec![1.0, 0.0, 0.0],
    )
    .unwrap()])
    .unwrap();
    sketcher.catalog().replace(replacement);

    let response = sketcher.generate("distinct names", &singer_schema()).await.unwrap();
    assert_eq!(response.selected_template.template_id, "tpl_custom");
    assert_eq!(response.final_query, r#"SELECT DISTINCT "Name" FROM "singer";"#);
}

#[test]
fn test_response_serializes_lowercase_status() {
    assert_eq!(serde_json::to_value(SketchStatus::Partial).unwrap(), json!("partial"));
    assert_eq!(serde_json::to_value(SketchStatus::Resolved).unwrap(), json!("resolved"));
}
