//! Template selection
//!
//! Each template is scored as `0.7 * cosine + 0.3 * (matches / 4)`, where
//! `matches` counts how many of the table/column/value/group_column markers
//! in the template have a non-empty intent field to fill them. The sort is
//! stable, so ties go to the earlier catalog entry.

use crate::error::{Result, SketchError};
use crate::intent::Intent;
use crate::similarity::cosine_similarity;
use crate::template::{Placeholder, Template};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const SEMANTIC_WEIGHT: f64 = 0.7;
const STRUCTURAL_WEIGHT: f64 = 0.3;

/// Categories counted by the structural match score.
const STRUCTURAL_CATEGORIES: [Placeholder; 4] = [
    Placeholder::Table,
    Placeholder::Column,
    Placeholder::Value,
    Placeholder::GroupColumn,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTemplate {
    pub template_id: String,
    pub template: String,
    pub cosine_similarity: f64,
    pub entity_match_score: usize,
    pub final_score: f64,
}

/// Whether `intent` has something to fill `placeholder` with.
fn intent_supplies(intent: &Intent, placeholder: Placeholder) -> bool {
    match placeholder {
        Placeholder::Table => !intent.tables.is_empty(),
        Placeholder::Column => !intent.columns.is_empty(),
        Placeholder::Value => !intent.conditions.is_empty(),
        Placeholder::GroupColumn => !intent.group_by.is_empty(),
        Placeholder::AggFunc | Placeholder::AggColumn => !intent.aggregations.is_empty(),
    }
}

pub fn count_matching_entities(template: &Template, intent: &Intent) -> usize {
    STRUCTURAL_CATEGORIES
        .iter()
        .filter(|p| template.has_marker(**p) && intent_supplies(intent, **p))
        .count()
}

pub fn score_template(query_embedding: &[f32], template: &Template, intent: &Intent) -> ScoredTemplate {
    if template.embedding.len() != query_embedding.len() {
        warn!(
            "Template {} embedding dimension {} differs from query dimension {}",
            template.template_id,
            template.embedding.len(),
            query_embedding.len()
        );
    }
    let cosine = cosine_similarity(query_embedding, &template.embedding);
    let matches = count_matching_entities(template, intent);
    let final_score = cosine * SEMANTIC_WEIGHT
        + (matches as f64 / STRUCTURAL_CATEGORIES.len() as f64) * STRUCTURAL_WEIGHT;

    ScoredTemplate {
        template_id: template.template_id.clone(),
        template: template.template.clone(),
        cosine_similarity: cosine,
        entity_match_score: matches,
        final_score,
    }
}

/// Score every template, best first.
pub fn rank(query_embedding: &[f32], intent: &Intent, catalog: &[Template]) -> Vec<ScoredTemplate> {
    let mut scored: Vec<ScoredTemplate> = catalog
        .iter()
        .map(|t| score_template(query_embedding, t, intent))
        .collect();
    scored.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    scored
}

/// Pick the best template. Fails only on an empty catalog.
pub fn select(query_embedding: &[f32], intent: &Intent, catalog: &[Template]) -> Result<ScoredTemplate> {
    let best = rank(query_embedding, intent, catalog)
        .into_iter()
        .next()
        .ok_or_else(|| SketchError::Catalog("No templates available".to_string()))?;
    debug!(
        "Selected template {} (cosine {:.4}, matches {}, score {:.4})",
        best.template_id, best.cosine_similarity, best.entity_match_score, best.final_score
    );
    Ok(best)
}
