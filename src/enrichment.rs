//! Second-pass enrichment
//!
//! When the first assembly leaves `UNKNOWN_*` sentinels behind, ask the
//! completion service for replacements, re-assemble the selected template
//! with them as overrides, then make sure every column it picked is
//! reachable from the anchor table.
//! Collaborator failures end up as notes; `enrich` itself never fails.

use crate::assembler::{assemble, remaining_sentinels, Overrides};
use crate::collaborators::{CompletionRequest, JoinRequest, JoinSuggester, PlaceholderCompleter};
use crate::formatter::{ensure_quoted, quote_column_ref, quote_identifier, split_identifiers, unquote_identifier};
use crate::intent::Intent;
use crate::join_graph::{apply_complex_assembly, has_join_for, insert_after_from, JoinGraph};
use crate::schema::SchemaSnapshot;
use crate::template::Placeholder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Overrides whose columns must exist in, or be joined to, the anchor table.
const COLUMN_CATEGORIES: [Placeholder; 3] = [Placeholder::Column, Placeholder::AggColumn, Placeholder::GroupColumn];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub query: String,
    pub notes: Vec<String>,
}

pub struct Enricher {
    completer: Arc<dyn PlaceholderCompleter>,
    joiner: Arc<dyn JoinSuggester>,
}

impl Enricher {
    pub fn new(completer: Arc<dyn PlaceholderCompleter>, joiner: Arc<dyn JoinSuggester>) -> Self {
        Self { completer, joiner }
    }

    /// `template` is the template `partial_query` was assembled from; the
    /// second pass starts from it again rather than from the partial query.
    pub async fn enrich(
        &self,
        template: &str,
        partial_query: &str,
        intent: &Intent,
        nl_text: &str,
        schema: &SchemaSnapshot,
    ) -> Enrichment {
        let mut notes = Vec::new();

        let unresolved = remaining_sentinels(partial_query);
        if unresolved.is_empty() {
            notes.push("No enrichment needed".to_string());
            return Enrichment {
                query: partial_query.to_string(),
                notes,
            };
        }
        info!("Enriching query with unresolved fields: {:?}", unresolved);

        let request = CompletionRequest {
            user_query: nl_text.to_string(),
            partial_sql: partial_query.to_string(),
            schema_columns: schema.columns.clone(),
        };
        let mut overrides = match self.completer.complete(&request).await {
            Ok(reply) => match overrides_from_reply(&reply) {
                Ok(overrides) => overrides,
                Err(message) => {
                    warn!("Placeholder completion failed: {}", message);
                    notes.push(format!("Placeholder completion failed: {}", message));
                    return Enrichment {
                        query: partial_query.to_string(),
                        notes,
                    };
                }
            },
            Err(e) => {
                warn!("Placeholder completion failed: {}", e);
                notes.push(format!("Placeholder completion failed: {}", e));
                return Enrichment {
                    query: partial_query.to_string(),
                    notes,
                };
            }
        };

        let mut applied: Vec<&str> = unresolved
            .iter()
            .filter(|p| overrides.contains_key(*p))
            .map(|p| p.name())
            .collect();
        applied.sort_unstable();
        if !applied.is_empty() {
            notes.push(format!("Overrides applied: {}", applied.join(", ")));
        }

        // Only gaps are filled; what the intent resolved stays.
        overrides.retain(|p, _| unresolved.contains(p));
        let reassembled = assemble(template, intent, &overrides);
        if !reassembled.missing_fields.is_empty() {
            let names: Vec<&str> = reassembled.missing_fields.iter().map(|p| p.name()).collect();
            notes.push(format!("Fields still missing after enrichment: {}", names.join(", ")));
        }
        let graph = JoinGraph::build(&schema.foreign_keys);
        // Joins and grouping from the first pass are already in the notes.
        let mut query = apply_complex_assembly(&reassembled.query, intent, &graph).query;

        let anchor = intent
            .anchor_table()
            .map(str::to_string)
            .or_else(|| overrides.get(&Placeholder::Table).map(|t| unquote_identifier(t)));
        let Some(anchor) = anchor else {
            notes.push("No anchor table known; skipped join inference".to_string());
            return Enrichment { query, notes };
        };

        for column in used_override_columns(&overrides, &unresolved) {
            if schema.table_has_column(&anchor, &column) {
                continue;
            }
            query = self
                .join_for_column(query, &column, &anchor, nl_text, schema, &graph, &mut notes)
                .await;
        }

        Enrichment { query, notes }
    }

    /// Attach a table that owns `column`: from the local join graph when one
    /// of the owners has a direct edge, otherwise from the join-suggestion
    /// service.
    #[allow(clippy::too_many_arguments)]
    async fn join_for_column(
        &self,
        query: String,
        column: &str,
        anchor: &str,
        nl_text: &str,
        schema: &SchemaSnapshot,
        graph: &JoinGraph,
        notes: &mut Vec<String>,
    ) -> String {
        let owners = schema.owners_of(column, anchor);
        if owners.iter().any(|owner| has_join_for(&query, owner)) {
            return query;
        }
        let local = owners
            .iter()
            .find_map(|owner| graph.find_join(anchor, owner).map(|condition| (*owner, condition)));
        if let Some((owner, condition)) = local {
            debug!("Column {} resolved locally through {}", column, owner);
            return attach_join(query, anchor, &ensure_quoted(owner), condition, notes);
        }

        let request = JoinRequest {
            user_query: nl_text.to_string(),
            missing_column: column.to_string(),
            main_table: anchor.to_string(),
            schema_columns: schema.columns.clone(),
        };
        match self.joiner.suggest_join(&request).await {
            Ok(reply) => match join_from_reply(&reply) {
                Ok((table, condition)) => {
                    if has_join_for(&query, &unquote_identifier(&table)) {
                        return query;
                    }
                    attach_join(query, anchor, &ensure_quoted(&table), &condition, notes)
                }
                Err(message) => {
                    warn!("No join suggestion for {}: {}", column, message);
                    notes.push(format!("Could not resolve column {}: {}", column, message));
                    query
                }
            },
            Err(e) => {
                warn!("Join suggestion failed for {}: {}", column, e);
                notes.push(format!("Could not resolve column {}: join suggestion failed: {}", column, e));
                query
            }
        }
    }
}

fn attach_join(query: String, anchor: &str, table: &str, condition: &str, notes: &mut Vec<String>) -> String {
    let clause = format!(" JOIN {} ON {}", table, condition);
    match insert_after_from(&query, anchor, &clause) {
        Some(patched) => {
            notes.push(format!("Join added:{}", clause));
            patched
        }
        None => {
            notes.push(format!("Could not place join for {}: no FROM clause for {}", table, anchor));
            query
        }
    }
}

/// Validate a completion reply into overrides.
///
/// Unknown keys and empty values are dropped. Identifier categories are
/// split on commas and each name quoted; a `*` column stays bare.
fn overrides_from_reply(reply: &Value) -> std::result::Result<Overrides, String> {
    let obj = reply
        .as_object()
        .ok_or_else(|| format!("expected a JSON object, got {}", reply))?;
    if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
        return Err(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    let mut overrides = Overrides::new();
    for (key, value) in obj {
        let Ok(placeholder) = key.parse::<Placeholder>() else {
            debug!("Ignoring unknown completion key {}", key);
            continue;
        };
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if text.is_empty() {
            continue;
        }
        let text = if placeholder.is_identifier() {
            let quoted: Vec<String> = split_identifiers(&text)
                .iter()
                .map(|name| match placeholder {
                    Placeholder::Table => quote_identifier(name),
                    _ => quote_column_ref(name),
                })
                .collect();
            if quoted.is_empty() {
                continue;
            }
            quoted.join(", ")
        } else {
            text
        };
        overrides.insert(placeholder, text);
    }
    Ok(overrides)
}

/// Bare column names the overrides introduced for categories that were unresolved.
fn used_override_columns(overrides: &Overrides, unresolved: &[Placeholder]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for category in COLUMN_CATEGORIES {
        if !unresolved.contains(&category) {
            continue;
        }
        if let Some(text) = overrides.get(&category) {
            for name in split_identifiers(text) {
                if name != "*" && !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }
    }
    columns
}

fn join_from_reply(reply: &Value) -> std::result::Result<(String, String), String> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        return Err(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }
    let table = reply
        .get("join_table")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let condition = reply
        .get("join_condition")
        .or_else(|| reply.get("on_condition"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty());
    match (table, condition) {
        (Some(t), Some(c)) => Ok((t.to_string(), c.to_string())),
        _ => Err("no join suggestion returned".to_string()),
    }
}
