use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sql_sketcher::config::Config;
use sql_sketcher::db::{self, ExplainValidator};
use sql_sketcher::llm::LlmClient;
use sql_sketcher::pipeline::SqlSketcher;
use sql_sketcher::template::{generate_catalog, CatalogHandle, TemplateCatalog, BUILTIN_TEMPLATES};

#[derive(Parser)]
#[command(name = "sql-sketcher")]
#[command(about = "Turn natural-language questions into SQL via template assembly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a SQL query for a natural-language question
    Generate {
        /// The question, e.g. "show singer names"
        query: String,

        /// Template catalog (defaults to SKETCHER_TEMPLATES or templates.json)
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Database to introspect (defaults to DATABASE_URL)
        #[arg(long)]
        database_url: Option<String>,

        /// Skip EXPLAIN validation of the final query
        #[arg(long)]
        no_validate: bool,
    },
    /// Embed the built-in templates and write a catalog file
    EmbedTemplates {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn llm_client(config: &Config) -> anyhow::Result<LlmClient> {
    Ok(LlmClient::new(
        config.require_api_key()?.to_string(),
        config.base_url.clone(),
        config.chat_model.clone(),
        config.embedding_model.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Generate {
            query,
            templates,
            database_url,
            no_validate,
        } => {
            let templates = templates.unwrap_or_else(|| config.templates_path.clone());
            let catalog = TemplateCatalog::load(&templates)?;
            let database_url = match database_url {
                Some(url) => url,
                None => config.require_database_url()?.to_string(),
            };
            let schema = db::load_schema(&database_url).await?;

            let llm = Arc::new(llm_client(&config)?);
            let mut sketcher =
                SqlSketcher::new(CatalogHandle::new(catalog), llm.clone(), llm.clone(), llm.clone(), llm);
            if !no_validate {
                sketcher = sketcher.with_validator(Arc::new(ExplainValidator));
            }

            let response = sketcher.generate(&query, &schema).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::EmbedTemplates { output } => {
            let output = output.unwrap_or_else(|| config.templates_path.clone());
            let llm = llm_client(&config)?;
            let catalog = generate_catalog(&llm, BUILTIN_TEMPLATES).await?;
            catalog.save(&output)?;
            info!(
                "Wrote {} templates ({} dimensions) to {}",
                catalog.len(),
                catalog.dimension(),
                output.display()
            );
        }
    }

    Ok(())
}
