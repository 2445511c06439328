//! Natural-language to SQL through template assembly
//!
//! A question is parsed into an intent, embedded, matched against a catalog
//! of SQL templates with `{{placeholder}}` markers, and the winning template
//! is filled from the intent. Whatever the intent cannot fill is handed to an
//! LLM completer, and columns from other tables are joined in.

pub mod assembler;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod formatter;
pub mod intent;
pub mod join_graph;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod selector;
pub mod server;
pub mod similarity;
pub mod template;

pub use error::{Result, SketchError};
pub use pipeline::{SketchResponse, SketchStatus, SqlSketcher};
