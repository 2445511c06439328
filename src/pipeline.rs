//! End-to-end request handling
//!
//! parse intent -> embed -> select template -> assemble -> patch joins and
//! grouping -> enrich -> validate. Only catalog problems and intent-parser
//! errors abort a request; everything else lands in the response.

use crate::assembler::{assemble, remaining_sentinels, Overrides};
use crate::collaborators::{Embedder, IntentParser, JoinSuggester, PlaceholderCompleter, SqlValidator, ValidationReport};
use crate::enrichment::Enricher;
use crate::error::{Result, SketchError};
use crate::intent::Intent;
use crate::join_graph::{apply_complex_assembly, JoinGraph};
use crate::schema::SchemaProvider;
use crate::selector::{select, ScoredTemplate};
use crate::template::{CatalogHandle, Placeholder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const EMBEDDING_PREVIEW_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SketchStatus {
    /// No sentinel left in the final query.
    Resolved,
    /// The query still contains `UNKNOWN_*` sentinels.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchResponse {
    pub status: SketchStatus,
    pub input: String,
    pub intent: Intent,
    pub embedding_preview: Vec<f32>,
    pub selected_template: ScoredTemplate,
    pub final_query: String,
    /// Fields the first assembly pass could not fill.
    pub missing_fields: Vec<Placeholder>,
    /// Fields still unresolved in `final_query`.
    pub unresolved_fields: Vec<Placeholder>,
    pub enrichment_notes: Vec<String>,
    pub validation: Option<ValidationReport>,
}

pub struct SqlSketcher {
    catalog: CatalogHandle,
    parser: Arc<dyn IntentParser>,
    embedder: Arc<dyn Embedder>,
    enricher: Enricher,
    validator: Option<Arc<dyn SqlValidator>>,
}

impl SqlSketcher {
    pub fn new(
        catalog: CatalogHandle,
        parser: Arc<dyn IntentParser>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn PlaceholderCompleter>,
        joiner: Arc<dyn JoinSuggester>,
    ) -> Self {
        Self {
            catalog,
            parser,
            embedder,
            enricher: Enricher::new(completer, joiner),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SqlValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    pub async fn generate(&self, nl_text: &str, schema: &dyn SchemaProvider) -> Result<SketchResponse> {
        let catalog = self.catalog.snapshot();
        if catalog.is_empty() {
            return Err(SketchError::Catalog("No templates available".to_string()));
        }
        let snapshot = schema.schema_dict();

        let payload = self.parser.parse(nl_text, snapshot).await?;
        let intent = Intent::from_payload(&payload)?;
        info!("Parsed intent: tables={:?} columns={:?}", intent.tables, intent.columns);

        let embedding = self.embedder.embed(nl_text).await?;
        if embedding.len() != catalog.dimension() {
            return Err(SketchError::Embedding(format!(
                "Query embedding has {} dimensions, catalog has {}",
                embedding.len(),
                catalog.dimension()
            )));
        }

        let selected = select(&embedding, &intent, catalog.templates())?;
        info!(
            "Selected template {} (score {:.4})",
            selected.template_id, selected.final_score
        );

        let assembled = assemble(&selected.template, &intent, &Overrides::new());
        if !assembled.missing_fields.is_empty() {
            info!("Missing fields after first pass: {:?}", assembled.missing_fields);
        }

        let graph = JoinGraph::build(schema.foreign_keys());
        let complex = apply_complex_assembly(&assembled.query, &intent, &graph);

        let enriched = self
            .enricher
            .enrich(&selected.template, &complex.query, &intent, nl_text, snapshot)
            .await;

        let mut notes = complex.notes;
        notes.extend(enriched.notes);

        let validation = match &self.validator {
            Some(v) => Some(v.validate(&enriched.query, schema.db_info()).await),
            None => None,
        };

        let unresolved_fields = remaining_sentinels(&enriched.query);
        let status = if unresolved_fields.is_empty() {
            SketchStatus::Resolved
        } else {
            SketchStatus::Partial
        };

        Ok(SketchResponse {
            status,
            input: nl_text.to_string(),
            intent,
            embedding_preview: embedding.iter().take(EMBEDDING_PREVIEW_LEN).copied().collect(),
            selected_template: selected,
            final_query: enriched.query,
            missing_fields: assembled.missing_fields,
            unresolved_fields,
            enrichment_notes: notes,
            validation,
        })
    }
}
