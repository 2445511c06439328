//! Prompts for the LLM-backed collaborators

use crate::schema::SchemaSnapshot;
use std::collections::BTreeMap;

/// System message sent with every chat completion.
pub const JSON_ONLY_SYSTEM_PROMPT: &str = "Return JSON only, no text.";

fn schema_listing(columns: &BTreeMap<String, Vec<String>>) -> String {
    let snapshot = SchemaSnapshot {
        columns: columns.clone(),
        ..SchemaSnapshot::default()
    };
    snapshot.describe()
}

pub fn intent_prompt(nl_query: &str, schema: &SchemaSnapshot) -> String {
    format!(
        r#"You are an NL2SQL assistant. Given the following user request in natural language, extract the SQL intent as a structured JSON object.

Request:
"""{}"""

Database schema:
{}

Output format:
{{
  "action": "SELECT",
  "tables": [],
  "columns": [],
  "conditions": [{{"column": "", "operator": "", "value": null}}],
  "aggregations": [{{"function": "", "column": ""}}],
  "group_by": [],
  "order_by": [],
  "limit": null
}}

List the main table first in "tables". Use names exactly as in the schema.
If some fields don't apply, leave them empty or null."#,
        nl_query,
        schema.describe()
    )
}

pub fn completion_prompt(user_query: &str, partial_sql: &str, schema_columns: &BTreeMap<String, Vec<String>>) -> String {
    format!(
        r#"You are a SQL assistant. A partially filled SQL query contains unknown placeholders like UNKNOWN_COLUMN,
UNKNOWN_TABLE, UNKNOWN_GROUP, etc. Based on the user's request and the database schema,
identify the correct replacements for those placeholders.

Return a JSON with keys like:
{{
  "table": "\"singer\"",
  "column": "\"Name\"",
  "group_column": "\"Singer_ID\"",
  "agg_func": "AVG",
  "agg_column": "\"Duration\"",
  "value": "3"
}}

STRICT INSTRUCTIONS:
- Return only a valid JSON. No commentary or explanation.
- Use identifiers exactly as in the schema, including double quotes.
- If you are unsure, give your best guess using schema columns.
- If a value does not apply, omit the key (do not return null or empty strings).
- Never remove quotes from identifiers. Respect casing.

User question:
"""{}"""

Partial SQL:
"""{}"""

Database schema:
{}

Return only the JSON object:"#,
        user_query,
        partial_sql,
        schema_listing(schema_columns)
    )
}

pub fn join_prompt(
    user_query: &str,
    missing_column: &str,
    main_table: &str,
    schema_columns: &BTreeMap<String, Vec<String>>,
) -> String {
    format!(
        r#"You are a SQL assistant helping to resolve JOIN conditions.

You are given a user question, a column that likely belongs to a different table,
the table the current query is anchored on, and the database schema.
Determine which table the column most likely belongs to and the JOIN condition that connects it.

Format your response strictly as:
{{
  "join_table": "target_table",
  "join_condition": "\"main_table\".\"foreign_key\" = \"target_table\".\"id\""
}}

Use only the schema provided. Always use double quotes for identifiers.

User question:
"""{}"""

Missing column:
{}

Main table:
{}

Schema:
{}

Respond only with a JSON object:"#,
        user_query,
        missing_column,
        main_table,
        schema_listing(schema_columns)
    )
}
