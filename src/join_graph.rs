//! Join graph
//!
//! Undirected adjacency built from foreign keys. Each key is phrased once as
//! `from_table."from_col" = to_table."to_col"` and stored under both
//! directions. Only direct adjacency is resolved; anything else is left for
//! the enrichment pass to ask the join-suggestion service about.

use crate::formatter::{mask_literals, quote_identifier};
use crate::intent::Intent;
use crate::schema::ForeignKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct JoinGraph {
    adjacency: HashMap<String, HashMap<String, String>>,
}

impl JoinGraph {
    pub fn build(foreign_keys: &[ForeignKey]) -> Self {
        let mut adjacency: HashMap<String, HashMap<String, String>> = HashMap::new();
        for fk in foreign_keys {
            let condition = format!(
                "{}.{} = {}.{}",
                fk.from_table,
                quote_identifier(&fk.from_column),
                fk.to_table,
                quote_identifier(&fk.to_column)
            );
            // First key between a pair wins in both directions.
            if adjacency
                .get(&fk.from_table)
                .map_or(false, |edges| edges.contains_key(&fk.to_table))
            {
                continue;
            }
            adjacency
                .entry(fk.from_table.clone())
                .or_default()
                .insert(fk.to_table.clone(), condition.clone());
            adjacency
                .entry(fk.to_table.clone())
                .or_default()
                .insert(fk.from_table.clone(), condition);
        }
        Self { adjacency }
    }

    pub fn find_join(&self, from_table: &str, to_table: &str) -> Option<&str> {
        self.adjacency
            .get(from_table)
            .and_then(|edges| edges.get(to_table))
            .map(String::as_str)
    }

    pub fn neighbors(&self, table: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .adjacency
            .get(table)
            .map(|edges| edges.keys().map(String::as_str).collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }
}

/// Insert `clause` right after the anchor's `FROM` clause.
///
/// Looks for `FROM "anchor"` first, then `FROM anchor` followed by a
/// non-identifier character. Returns `None` if neither is present.
pub fn insert_after_from(query: &str, anchor: &str, clause: &str) -> Option<String> {
    let quoted = format!("FROM {}", quote_identifier(anchor));
    let position = query.find(&quoted).map(|i| i + quoted.len()).or_else(|| {
        let bare = format!("FROM {}", anchor);
        query.match_indices(&bare).map(|(i, _)| i + bare.len()).find(|end| {
            query[*end..]
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
        })
    })?;

    let mut out = String::with_capacity(query.len() + clause.len());
    out.push_str(&query[..position]);
    out.push_str(clause);
    out.push_str(&query[position..]);
    Some(out)
}

/// Whether `query` already joins `table`.
pub fn has_join_for(query: &str, table: &str) -> bool {
    let quoted = format!("JOIN {} ", quote_identifier(table));
    let bare = format!("JOIN {} ", table);
    query.contains(&quoted) || query.contains(&bare)
}

/// Clauses that must come after `GROUP BY`.
const AFTER_GROUP_BY: [&str; 4] = ["HAVING", "ORDER BY", "LIMIT", "OFFSET"];

/// Byte offset of the first top-level `HAVING`/`ORDER BY`/`LIMIT`/`OFFSET`,
/// ignoring string literals, quoted identifiers and subqueries.
fn trailing_clause_start(query: &str) -> Option<usize> {
    let sql = mask_literals(query).to_ascii_uppercase();
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    let mut in_identifier = false;

    for (i, ch) in sql.char_indices() {
        match ch {
            '"' => in_identifier = !in_identifier,
            _ if in_identifier => {}
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ => {
                if i > 0 && !bytes[i - 1].is_ascii_whitespace() {
                    continue;
                }
                let rest = &sql[i..];
                let found = AFTER_GROUP_BY.iter().any(|kw| {
                    rest.starts_with(kw)
                        && rest[kw.len()..]
                            .chars()
                            .next()
                            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
                });
                if found {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Put `GROUP BY <columns>` ahead of any trailing clause, else at the end
/// (before a final `;`).
fn insert_group_by(query: &str, columns: &str) -> String {
    if let Some(position) = trailing_clause_start(query) {
        return format!("{}GROUP BY {} {}", &query[..position], columns, &query[position..]);
    }
    let trimmed = query.trim_end();
    match trimmed.strip_suffix(';') {
        Some(body) => format!("{} GROUP BY {};", body.trim_end(), columns),
        None => format!("{} GROUP BY {}", trimmed, columns),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexAssembly {
    pub query: String,
    pub notes: Vec<String>,
}

/// Patch in what a template cannot express: joins for every extra intent
/// table with a direct foreign key to the anchor, and a `GROUP BY` when the
/// intent groups but the template did not.
pub fn apply_complex_assembly(query: &str, intent: &Intent, graph: &JoinGraph) -> ComplexAssembly {
    let mut query = query.to_string();
    let mut notes = Vec::new();

    if let Some((anchor, others)) = intent.tables.split_first() {
        for other in others {
            if other == anchor || has_join_for(&query, other) {
                continue;
            }
            let Some(condition) = graph.find_join(anchor, other) else {
                info!("No join path from {} to {}", anchor, other);
                notes.push(format!("No join path from {} to {}", anchor, other));
                continue;
            };
            let clause = format!(" JOIN {} ON {}", quote_identifier(other), condition);
            match insert_after_from(&query, anchor, &clause) {
                Some(patched) => {
                    debug!("Join added:{}", clause);
                    notes.push(format!("Join added:{}", clause));
                    query = patched;
                }
                None => notes.push(format!(
                    "Could not place join for {}: no FROM clause for {}",
                    other, anchor
                )),
            }
        }
    }

    if !intent.group_by.is_empty() && !mask_literals(&query).to_uppercase().contains("GROUP BY") {
        let columns: Vec<String> = intent.group_by.iter().map(|c| quote_identifier(c)).collect();
        let columns = columns.join(", ");
        query = insert_group_by(&query, &columns);
        notes.push(format!("Group by: GROUP BY {}", columns));
    }

    ComplexAssembly { query, notes }
}
