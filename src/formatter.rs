//! Identifier and literal formatting
//!
//! Every table or column name that ends up in generated SQL goes through
//! `quote_identifier`; every condition value goes through `format_literal`.
//! `format_literal` only escapes single quotes. It does not make an
//! attacker-controlled value safe to embed.

use serde_json::Value;

/// Wrap `name` in double quotes, doubling any embedded double quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a column reference; the `*` wildcard stays bare so `COUNT(*)` and
/// `SELECT *` remain valid.
pub fn quote_column_ref(name: &str) -> String {
    match name.trim() {
        "*" => "*".to_string(),
        trimmed => quote_identifier(trimmed),
    }
}

/// Quote `name` unless it is already wrapped in double quotes.
///
/// Values coming back from the completion service are meant to be quoted
/// already; this keeps them from being wrapped a second time.
pub fn ensure_quoted(name: &str) -> String {
    let trimmed = name.trim();
    if is_quoted(trimmed) {
        trimmed.to_string()
    } else {
        quote_identifier(trimmed)
    }
}

pub fn is_quoted(name: &str) -> bool {
    name.len() >= 2 && name.starts_with('"') && name.ends_with('"')
}

/// Strip one layer of identifier quoting, collapsing doubled quotes.
pub fn unquote_identifier(name: &str) -> String {
    let trimmed = name.trim();
    if is_quoted(trimmed) {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_string()
    }
}

/// Split a comma separated identifier list (`"a", "b"`) into bare names.
/// Commas inside quoted identifiers are kept.
pub fn split_identifiers(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in list.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .iter()
        .map(|p| unquote_identifier(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Copy of `sql` with the contents of single-quoted literals blanked out, so
/// keyword and sentinel scans only see SQL text. Byte offsets are preserved.
pub fn mask_literals(sql: &str) -> String {
    let mut in_literal = false;
    sql.chars()
        .map(|ch| {
            if ch == '\'' {
                in_literal = !in_literal;
                ch
            } else if in_literal {
                if ch.is_ascii() {
                    ' '
                } else {
                    // keep multi-byte chars so offsets line up
                    ch
                }
            } else {
                ch
            }
        })
        .collect()
}

/// Render a condition value as a SQL literal.
///
/// Strings are single-quoted with embedded quotes doubled; numbers and
/// booleans print as-is; arrays become a parenthesised list for `IN`.
pub fn format_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Null => "NULL".to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_literal).collect();
            format!("({})", rendered.join(", "))
        }
        Value::Object(_) => format!("'{}'", value.to_string().replace('\'', "''")),
    }
}
