use thiserror::Error;

#[derive(Error, Debug)]
pub enum SketchError {
    #[error("Template catalog error: {0}")]
    Catalog(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The intent parser reported an error or returned an unusable payload.
    #[error("Intent error: {0}")]
    Intent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SketchError>;
