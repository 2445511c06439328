//! External collaborators
//!
//! Everything the pipeline consumes but does not compute: intent parsing,
//! embeddings, placeholder completion, join suggestions and SQL validation.
//! They are passed in as trait objects so tests can swap in stubs.

use crate::error::Result;
use crate::schema::{DbInfo, SchemaSnapshot};
use crate::template::Embedding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Turns a natural-language request into a raw intent payload.
/// The payload is validated by `Intent::from_payload`.
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse(&self, nl_text: &str, schema: &SchemaSnapshot) -> Result<Value>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub user_query: String,
    pub partial_sql: String,
    pub schema_columns: BTreeMap<String, Vec<String>>,
}

/// Suggests replacements for `UNKNOWN_*` sentinels. Returns a map of
/// placeholder name to replacement text, or `{"error": ...}`.
#[async_trait]
pub trait PlaceholderCompleter: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_query: String,
    pub missing_column: String,
    pub main_table: String,
    pub schema_columns: BTreeMap<String, Vec<String>>,
}

/// Suggests which table a column lives in and how to join it. Returns
/// `{join_table, join_condition}` or `{"error": ...}`.
#[async_trait]
pub trait JoinSuggester: Send + Sync {
    async fn suggest_join(&self, request: &JoinRequest) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub explain_output: Vec<String>,
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn ok(explain_output: Vec<String>) -> Self {
        Self {
            valid: true,
            explain_output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            explain_output: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Checks a finished query against the live database. Failures are part of
/// the report, never an `Err`.
#[async_trait]
pub trait SqlValidator: Send + Sync {
    async fn validate(&self, query: &str, db_info: &DbInfo) -> ValidationReport;
}
