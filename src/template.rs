//! SQL template catalog
//!
//! Templates are plain SQL strings with `{{marker}}` placeholders drawn from
//! a closed vocabulary (`Placeholder`). Each template carries a precomputed
//! embedding of its text; the catalog is loaded once and never mutated.
//! Refreshing it means building a new catalog and swapping it into a
//! `CatalogHandle`.

use crate::collaborators::Embedder;
use crate::error::{Result, SketchError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::info;

lazy_static! {
    pub(crate) static ref MARKER: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
}

/// Embedding vector type shared by templates and queries.
pub type Embedding = Vec<f32>;

/// Placeholder categories a template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    Column,
    Table,
    Value,
    GroupColumn,
    AggFunc,
    AggColumn,
}

impl Placeholder {
    /// Resolution and reporting order.
    pub const ALL: [Placeholder; 6] = [
        Placeholder::Column,
        Placeholder::Table,
        Placeholder::Value,
        Placeholder::GroupColumn,
        Placeholder::AggFunc,
        Placeholder::AggColumn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Column => "column",
            Placeholder::Table => "table",
            Placeholder::Value => "value",
            Placeholder::GroupColumn => "group_column",
            Placeholder::AggFunc => "agg_func",
            Placeholder::AggColumn => "agg_column",
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Placeholder::Column => "{{column}}",
            Placeholder::Table => "{{table}}",
            Placeholder::Value => "{{value}}",
            Placeholder::GroupColumn => "{{group_column}}",
            Placeholder::AggFunc => "{{agg_func}}",
            Placeholder::AggColumn => "{{agg_column}}",
        }
    }

    /// Fallback text left in the query when the category cannot be resolved.
    pub fn sentinel(self) -> &'static str {
        match self {
            Placeholder::Column => "UNKNOWN_COLUMN",
            Placeholder::Table => "UNKNOWN_TABLE",
            Placeholder::Value => "UNKNOWN_VALUE",
            Placeholder::GroupColumn => "UNKNOWN_GROUP",
            Placeholder::AggFunc => "UNKNOWN_AGG_FUNC",
            Placeholder::AggColumn => "UNKNOWN_AGG_COLUMN",
        }
    }

    /// Categories whose replacement text is a SQL identifier.
    pub fn is_identifier(self) -> bool {
        matches!(
            self,
            Placeholder::Table | Placeholder::Column | Placeholder::GroupColumn | Placeholder::AggColumn
        )
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Placeholder {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self> {
        Placeholder::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| SketchError::Catalog(format!("Unknown placeholder marker: {{{{{}}}}}", s)))
    }
}

/// Check that every `{{...}}` marker in `text` belongs to the vocabulary.
pub fn validate_markers(text: &str) -> Result<Vec<Placeholder>> {
    let mut found = Vec::new();
    for caps in MARKER.captures_iter(text) {
        let p: Placeholder = caps[1].parse()?;
        if &caps[0] != p.marker() {
            return Err(SketchError::Catalog(format!(
                "Malformed placeholder marker '{}' (expected '{}')",
                &caps[0],
                p.marker()
            )));
        }
        if !found.contains(&p) {
            found.push(p);
        }
    }
    Ok(found)
}

/// A catalog entry. Field names match the persisted JSON records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub template_id: String,
    pub template: String,
    pub embedding: Embedding,
}

impl Template {
    pub fn new(template_id: impl Into<String>, template: impl Into<String>, embedding: Embedding) -> Result<Self> {
        let template = template.into();
        validate_markers(&template)?;
        Ok(Self {
            template_id: template_id.into(),
            template,
            embedding,
        })
    }

    pub fn has_marker(&self, placeholder: Placeholder) -> bool {
        self.template.contains(placeholder.marker())
    }
}

/// A template before its embedding has been computed.
#[derive(Debug, Clone, Copy)]
pub struct RawTemplate {
    pub id: &'static str,
    pub template: &'static str,
}

/// Built-in template set used to generate the catalog file.
pub const BUILTIN_TEMPLATES: &[RawTemplate] = &[
    RawTemplate { id: "tpl_01", template: "SELECT {{column}} FROM {{table}};" },
    RawTemplate { id: "tpl_02", template: "SELECT {{column}} FROM {{table}} WHERE {{column}} = {{value}};" },
    RawTemplate { id: "tpl_03", template: "SELECT AVG({{column}}) FROM {{table}};" },
    RawTemplate { id: "tpl_04", template: "SELECT {{column}} FROM {{table}} ORDER BY {{column}};" },
    RawTemplate { id: "tpl_05", template: "SELECT {{column}} FROM {{table}} LIMIT {{value}};" },
    RawTemplate {
        id: "tpl_06",
        template: "SELECT {{group_column}}, AVG({{column}}) FROM {{table}} GROUP BY {{group_column}};",
    },
    RawTemplate {
        id: "tpl_07",
        template: "SELECT {{group_column}}, AVG({{column}}) FROM {{table}} GROUP BY {{group_column}} HAVING AVG({{column}}) > {{value}};",
    },
    RawTemplate {
        id: "tpl_08",
        template: "SELECT {{group_column}}, {{agg_func}}({{agg_column}}) FROM {{table}} GROUP BY {{group_column}};",
    },
    RawTemplate { id: "tpl_09", template: "SELECT COUNT({{column}}) FROM {{table}};" },
    RawTemplate { id: "tpl_10", template: "SELECT MAX({{column}}) FROM {{table}} WHERE {{column}} < {{value}};" },
];

/// Immutable, validated set of templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Build a catalog; rejects an empty set, unknown markers and mixed
    /// embedding dimensions.
    pub fn new(templates: Vec<Template>) -> Result<Self> {
        if templates.is_empty() {
            return Err(SketchError::Catalog("No templates available".to_string()));
        }
        let dim = templates[0].embedding.len();
        for t in &templates {
            validate_markers(&t.template)
                .map_err(|e| SketchError::Catalog(format!("Template {}: {}", t.template_id, e)))?;
            if t.embedding.len() != dim {
                return Err(SketchError::Catalog(format!(
                    "Template {} has embedding dimension {}, expected {}",
                    t.template_id,
                    t.embedding.len(),
                    dim
                )));
            }
        }
        Ok(Self { templates })
    }

    /// Load a catalog from its JSON file (`[{template_id, template, embedding}]`).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SketchError::Catalog(format!("Template file not readable at {}: {}", path.display(), e))
        })?;
        let templates: Vec<Template> = serde_json::from_str(&content).map_err(|e| {
            SketchError::Catalog(format!("Template file {} is malformed: {}", path.display(), e))
        })?;
        let catalog = Self::new(templates)?;
        info!(
            "Loaded {} templates (dimension {}) from {}",
            catalog.len(),
            catalog.dimension(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.templates)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.templates.first().map(|t| t.embedding.len()).unwrap_or(0)
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.template_id == template_id)
    }
}

/// Compute embeddings for `raw` one template at a time.
pub async fn generate_catalog(embedder: &dyn Embedder, raw: &[RawTemplate]) -> Result<TemplateCatalog> {
    let mut templates = Vec::with_capacity(raw.len());
    for tpl in raw {
        let embedding = embedder.embed(tpl.template).await?;
        info!("Embedded template {} ({} dims)", tpl.id, embedding.len());
        templates.push(Template::new(tpl.id, tpl.template, embedding)?);
    }
    TemplateCatalog::new(templates)
}

/// Shared, swappable reference to the current catalog.
///
/// Readers take an `Arc` snapshot and keep using it even if a refresh
/// replaces the catalog mid-request.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<TemplateCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    pub fn snapshot(&self) -> Arc<TemplateCatalog> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, catalog: TemplateCatalog) {
        let next = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
