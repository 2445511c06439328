//! Query intent
//!
//! The intent parser is an LLM, so its payload is loosely typed. `Intent::from_payload`
//! is the only way in: it short-circuits on an `error` key and turns every
//! absent or malformed field into an empty one.

use crate::error::{Result, SketchError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

lazy_static! {
    /// `AVG(score)` style aggregation strings.
    static ref AGG_CALL: Regex = Regex::new(r"^\s*([A-Za-z_]+)\s*\(\s*([^)]*?)\s*\)\s*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub conditions: Vec<Condition>,
    pub aggregations: Vec<Aggregation>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub operator: String,
    /// `None` when the parser gave no value or an explicit null.
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: String,
    pub column: String,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            action: "SELECT".to_string(),
            tables: Vec::new(),
            columns: Vec::new(),
            conditions: Vec::new(),
            aggregations: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}

impl Intent {
    /// Validate a raw parser payload.
    ///
    /// Fails only when the payload carries an `error` key (at any depth) or is
    /// not a JSON object at all.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        if let Some(message) = find_error(payload) {
            return Err(SketchError::Intent(message));
        }
        let obj = payload.as_object().ok_or_else(|| {
            SketchError::Intent(format!("Intent payload is not a JSON object: {}", payload))
        })?;

        let action = obj
            .get("action")
            .and_then(Value::as_str)
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "SELECT".to_string());

        Ok(Self {
            action,
            tables: string_list(obj.get("tables")),
            columns: string_list(obj.get("columns")),
            conditions: list_items(obj.get("conditions"))
                .iter()
                .filter_map(condition_from_value)
                .collect(),
            aggregations: list_items(obj.get("aggregations"))
                .iter()
                .filter_map(aggregation_from_value)
                .collect(),
            group_by: string_list(obj.get("group_by")),
            order_by: list_items(obj.get("order_by"))
                .iter()
                .filter_map(order_term_from_value)
                .collect(),
            limit: obj.get("limit").and_then(limit_from_value),
        })
    }

    pub fn anchor_table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }
}

/// Depth-first search for an `error` key anywhere in the payload.
fn find_error(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(err) = map.get("error") {
                if !err.is_null() {
                    return Some(match err {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                }
            }
            map.values().find_map(find_error)
        }
        Value::Array(items) => items.iter().find_map(find_error),
        _ => None,
    }
}

/// A field may arrive as a list, a single item, or null.
fn list_items(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.clone()],
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    list_items(value).iter().filter_map(non_empty_string).collect()
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(non_empty_string)
}

fn condition_from_value(value: &Value) -> Option<Condition> {
    let obj = value.as_object()?;
    let column = str_field(obj, &["column"])?;
    let operator = str_field(obj, &["operator", "op"]).unwrap_or_else(|| "=".to_string());
    let value = obj.get("value").filter(|v| !v.is_null()).cloned();
    Some(Condition {
        column,
        operator,
        value,
    })
}

fn aggregation_from_value(value: &Value) -> Option<Aggregation> {
    match value {
        Value::Object(obj) => Some(Aggregation {
            function: str_field(obj, &["function", "func", "type"])?.to_uppercase(),
            column: str_field(obj, &["column"]).unwrap_or_else(|| "*".to_string()),
        }),
        Value::String(s) => {
            let caps = AGG_CALL.captures(s)?;
            let column = caps[2].trim();
            Some(Aggregation {
                function: caps[1].to_uppercase(),
                column: if column.is_empty() { "*".to_string() } else { column.to_string() },
            })
        }
        _ => None,
    }
}

fn order_term_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => {
            let column = str_field(obj, &["column"])?;
            match str_field(obj, &["direction", "order"]) {
                Some(dir) => Some(format!("{} {}", column, dir.to_uppercase())),
                None => Some(column),
            }
        }
        other => non_empty_string(other),
    }
}

fn limit_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_payload() {
        let intent = Intent::from_payload(&json!({
            "action": "select",
            "tables": ["singer"],
            "columns": ["Name"],
            "conditions": [{"column": "Age", "operator": ">", "value": 20}],
            "aggregations": [{"function": "avg", "column": "Age"}],
            "joins": false,
            "group_by": ["Country"],
            "order_by": [{"column": "Age", "direction": "desc"}],
            "limit": 5
        }))
        .unwrap();

        assert_eq!(intent.action, "SELECT");
        assert_eq!(intent.tables, vec!["singer"]);
        assert_eq!(intent.conditions[0].value, Some(json!(20)));
        assert_eq!(intent.aggregations[0], Aggregation { function: "AVG".into(), column: "Age".into() });
        assert_eq!(intent.order_by, vec!["Age DESC"]);
        assert_eq!(intent.limit, Some(5));
    }

    #[test]
    fn test_missing_and_malformed_fields_become_empty() {
        let intent = Intent::from_payload(&json!({
            "tables": null,
            "columns": "Name",
            "conditions": [{"operator": ">"}, "garbage"],
            "group_by": ["", "  "],
            "limit": "ten"
        }))
        .unwrap();

        assert!(intent.tables.is_empty());
        assert_eq!(intent.columns, vec!["Name"]);
        assert!(intent.conditions.is_empty());
        assert!(intent.group_by.is_empty());
        assert_eq!(intent.limit, None);
        assert_eq!(intent.action, "SELECT");
    }

    #[test]
    fn test_null_condition_value_is_absent() {
        let intent = Intent::from_payload(&json!({
            "conditions": [{"column": "Age", "operator": ">", "value": null}]
        }))
        .unwrap();
        assert_eq!(intent.conditions[0].value, None);
    }

    #[test]
    fn test_string_aggregations() {
        let intent = Intent::from_payload(&json!({
            "aggregations": ["avg(Duration)", "COUNT()", "nonsense"]
        }))
        .unwrap();
        assert_eq!(intent.aggregations.len(), 2);
        assert_eq!(intent.aggregations[0].column, "Duration");
        assert_eq!(intent.aggregations[1].column, "*");
    }

    #[test]
    fn test_error_key_short_circuits() {
        let err = Intent::from_payload(&json!({"error": "Invalid JSON format"})).unwrap_err();
        assert!(matches!(err, SketchError::Intent(ref m) if m == "Invalid JSON format"));

        let nested = json!({"tables": [], "meta": {"error": "quota exceeded"}});
        assert!(Intent::from_payload(&nested).is_err());

        // An explicit null error is not an error.
        assert!(Intent::from_payload(&json!({"error": null, "tables": ["a"]})).is_ok());
    }

    #[test]
    fn test_non_object_payload() {
        assert!(Intent::from_payload(&json!([1, 2])).is_err());
    }
}
