//! JSON-Schema sanitation for tool declarations sent to Gemini-family targets.
//!
//! Gemini's function-calling schema only understands a small subset of
//! JSON-Schema; unsupported keywords are silently rejected upstream (or
//! worse, cause a 400). This strips what it can't use and flattens the
//! constructs it has no equivalent for.
use serde_json::{Map, Value};

const UNSUPPORTED_SCHEMA_CONSTRAINTS: &[&str] = &[
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "pattern",
    "minItems",
    "maxItems",
    "format",
    "default",
    "examples",
    "$schema",
    "$defs",
    "definitions",
    "const",
    "$ref",
    "additionalProperties",
    "propertyNames",
    "patternProperties",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "dependencies",
    "dependentSchemas",
    "dependentRequired",
    "title",
    "if",
    "then",
    "else",
    "contentMediaType",
    "contentEncoding",
];

/// Recursively sanitizes a JSON-Schema value for the Gemini tool-declaration surface.
pub fn clean_for_gemini(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => clean_object(map),
        Value::Array(items) => Value::Array(items.iter().map(clean_for_gemini).collect()),
        other => other.clone(),
    }
}

fn clean_object(map: &Map<String, Value>) -> Value {
    if let Some(branch) = first_non_null_branch(map, "anyOf") {
        return clean_for_gemini(&branch);
    }
    if let Some(branch) = first_non_null_branch(map, "oneOf") {
        return clean_for_gemini(&branch);
    }

    let mut out = Map::new();
    for (key, value) in map {
        if UNSUPPORTED_SCHEMA_CONSTRAINTS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            "type" => out.insert(key.clone(), coalesce_type(value)),
            "properties" => {
                let cleaned = match value {
                    Value::Object(props) => Value::Object(
                        props
                            .iter()
                            .map(|(k, v)| (k.clone(), clean_for_gemini(v)))
                            .collect(),
                    ),
                    other => clean_for_gemini(other),
                };
                out.insert(key.clone(), cleaned)
            }
            "required" => {
                let props = map.get("properties").and_then(Value::as_object);
                let filtered: Vec<Value> = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter(|v| {
                                let Some(name) = v.as_str() else {
                                    return false;
                                };
                                props.map(|p| p.contains_key(name)).unwrap_or(false)
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                if filtered.is_empty() {
                    continue;
                }
                out.insert(key.clone(), Value::Array(filtered))
            }
            _ => out.insert(key.clone(), clean_for_gemini(value)),
        };
    }

    if is_empty_object_schema(&out) {
        out.insert(
            "properties".to_string(),
            Value::Object(
                [(
                    "reason".to_string(),
                    serde_json::json!({ "type": "string" }),
                )]
                .into_iter()
                .collect(),
            ),
        );
    }

    Value::Object(out)
}

fn is_empty_object_schema(map: &Map<String, Value>) -> bool {
    let is_object_type = matches!(map.get("type"), Some(Value::String(t)) if t == "object");
    let has_no_properties = map
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| p.is_empty())
        .unwrap_or(true);
    is_object_type && has_no_properties
}

fn first_non_null_branch(map: &Map<String, Value>, key: &str) -> Option<Value> {
    let branches = map.get(key)?.as_array()?;
    branches
        .iter()
        .find(|branch| {
            !matches!(
                branch.get("type"),
                Some(Value::String(t)) if t == "null"
            )
        })
        .cloned()
        .or_else(|| branches.first().cloned())
}

fn coalesce_type(value: &Value) -> Value {
    match value {
        Value::Array(types) => types
            .iter()
            .find(|t| !matches!(t, Value::String(s) if s == "null"))
            .cloned()
            .or_else(|| types.first().cloned())
            .unwrap_or_else(|| Value::String("string".to_string())),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_unsupported_keywords() {
        let schema = json!({
            "type": "string",
            "minLength": 1,
            "pattern": "^a",
            "format": "email",
            "default": "x",
        });
        let cleaned = clean_for_gemini(&schema);
        assert_eq!(cleaned, json!({ "type": "string" }));
    }

    #[test]
    fn flattens_any_of_to_first_non_null() {
        let schema = json!({
            "anyOf": [
                { "type": "null" },
                { "type": "string", "minLength": 2 },
            ]
        });
        assert_eq!(clean_for_gemini(&schema), json!({ "type": "string" }));
    }

    #[test]
    fn coalesces_type_arrays() {
        let schema = json!({ "type": ["string", "null"] });
        assert_eq!(clean_for_gemini(&schema), json!({ "type": "string" }));
    }

    #[test]
    fn drops_required_entries_absent_from_properties() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "required": ["a", "b"],
        });
        assert_eq!(
            clean_for_gemini(&schema),
            json!({
                "type": "object",
                "properties": { "a": { "type": "string" } },
                "required": ["a"],
            })
        );
    }

    #[test]
    fn injects_placeholder_for_empty_object_schema() {
        let schema = json!({ "type": "object" });
        assert_eq!(
            clean_for_gemini(&schema),
            json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } },
            })
        );
    }

    #[test]
    fn is_idempotent() {
        let schema = json!({
            "anyOf": [
                { "type": "null" },
                {
                    "type": "object",
                    "properties": { "x": { "type": ["integer", "null"], "minimum": 0 } },
                    "required": ["x", "y"],
                    "additionalProperties": false,
                },
            ]
        });
        let once = clean_for_gemini(&schema);
        let twice = clean_for_gemini(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_unsupported_keys_survive() {
        let schema = json!({
            "type": "object",
            "properties": {
                "p": {
                    "const": "x",
                    "$ref": "#/defs/foo",
                    "title": "P",
                }
            }
        });
        let cleaned = clean_for_gemini(&schema);
        let serialized = serde_json::to_string(&cleaned).unwrap();
        for key in UNSUPPORTED_SCHEMA_CONSTRAINTS {
            assert!(!serialized.contains(&format!("\"{key}\"")), "{key} leaked");
        }
    }
}
