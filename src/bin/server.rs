//! HTTP server for SQL sketch generation

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sql_sketcher::config::Config;
use sql_sketcher::db::ExplainValidator;
use sql_sketcher::llm::LlmClient;
use sql_sketcher::pipeline::SqlSketcher;
use sql_sketcher::server::{serve, AppState, SchemaSource};
use sql_sketcher::template::{CatalogHandle, TemplateCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    info!("Starting sketcher server with {:?}", config);

    let catalog = TemplateCatalog::load(&config.templates_path)?;
    info!("Loaded {} templates from {}", catalog.len(), config.templates_path.display());

    let database_url = config.require_database_url()?.to_string();
    let llm = Arc::new(LlmClient::new(
        config.require_api_key()?.to_string(),
        config.base_url.clone(),
        config.chat_model.clone(),
        config.embedding_model.clone(),
    ));
    let sketcher = SqlSketcher::new(CatalogHandle::new(catalog), llm.clone(), llm.clone(), llm.clone(), llm)
        .with_validator(Arc::new(ExplainValidator));

    // Fail fast on a bad database URL rather than on the first request.
    if let Err(e) = sql_sketcher::db::load_schema(&database_url).await {
        warn!("Initial schema load failed: {}", e);
        return Err(e.into());
    }

    let state = Arc::new(AppState {
        sketcher,
        schema: SchemaSource::Database(database_url),
    });
    let listener = TcpListener::bind(&config.bind).await?;
    serve(listener, state).await?;
    Ok(())
}
