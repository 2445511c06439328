//! Placeholder assembly
//!
//! Fills a template's markers from the intent, or from overrides supplied by
//! the enrichment pass. Never fails: anything that cannot be resolved is
//! replaced by its `UNKNOWN_*` sentinel and listed in `missing_fields`.

use crate::formatter::{format_literal, mask_literals, quote_column_ref, quote_identifier};
use crate::intent::Intent;
use crate::template::{Placeholder, MARKER};
use regex::Captures;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate calls whose argument is `{{column}}`; such a column comes from
/// the intent's aggregations rather than its column list.
const AGGREGATE_COLUMN_CALLS: [&str; 3] = ["AVG({{column}})", "SUM({{column}})", "COUNT({{column}})"];

/// Final replacement text per category, already quoted/escaped.
pub type Overrides = HashMap<Placeholder, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyResult {
    pub query: String,
    pub missing_fields: Vec<Placeholder>,
}

impl AssemblyResult {
    /// No missing fields and no sentinel left in the query.
    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty() && remaining_sentinels(&self.query).is_empty()
    }
}

/// Sentinels still present in `query` outside string literals, in
/// vocabulary order.
pub fn remaining_sentinels(query: &str) -> Vec<Placeholder> {
    let sql = mask_literals(query);
    Placeholder::ALL
        .iter()
        .copied()
        .filter(|p| sql.contains(p.sentinel()))
        .collect()
}

fn quoted_first(items: &[String]) -> Option<String> {
    items.first().map(|s| quote_identifier(s))
}

/// Resolve one category from the intent alone.
fn resolve_from_intent(placeholder: Placeholder, template: &str, intent: &Intent) -> Option<String> {
    match placeholder {
        Placeholder::Column => {
            let aggregate_arg = AGGREGATE_COLUMN_CALLS.iter().any(|call| template.contains(call));
            let from_aggregation = if aggregate_arg {
                intent.aggregations.first().map(|a| quote_column_ref(&a.column))
            } else {
                None
            };
            from_aggregation.or_else(|| {
                if intent.columns.is_empty() {
                    None
                } else {
                    let quoted: Vec<String> = intent.columns.iter().map(|c| quote_column_ref(c)).collect();
                    Some(quoted.join(", "))
                }
            })
        }
        Placeholder::Table => quoted_first(&intent.tables),
        Placeholder::Value => intent
            .conditions
            .first()
            .and_then(|c| c.value.as_ref())
            .map(format_literal),
        Placeholder::GroupColumn => quoted_first(&intent.group_by),
        Placeholder::AggFunc => intent
            .aggregations
            .first()
            .map(|a| a.function.trim().to_uppercase())
            .filter(|f| !f.is_empty()),
        Placeholder::AggColumn => intent.aggregations.first().map(|a| quote_column_ref(&a.column)),
    }
}

/// Fill every marker in `template`.
///
/// Overrides win over intent-derived values. Every occurrence of a marker
/// gets the same replacement; markers outside the vocabulary are left as-is.
pub fn assemble(template: &str, intent: &Intent, overrides: &Overrides) -> AssemblyResult {
    let mut resolved: HashMap<Placeholder, String> = HashMap::new();
    let mut missing_fields = Vec::new();

    for placeholder in Placeholder::ALL {
        if !template.contains(placeholder.marker()) {
            continue;
        }
        let value = overrides
            .get(&placeholder)
            .cloned()
            .or_else(|| resolve_from_intent(placeholder, template, intent));
        match value {
            Some(v) => {
                resolved.insert(placeholder, v);
            }
            None => {
                resolved.insert(placeholder, placeholder.sentinel().to_string());
                missing_fields.push(placeholder);
            }
        }
    }

    // One pass over the original text, so replacement text that happens to
    // contain a marker is never substituted again.
    let query = MARKER
        .replace_all(template, |caps: &Captures| {
            caps[1]
                .parse::<Placeholder>()
                .ok()
                .filter(|p| &caps[0] == p.marker())
                .and_then(|p| resolved.get(&p).cloned())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned();

    AssemblyResult { query, missing_fields }
}
