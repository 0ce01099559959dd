//! Merging of per-round extraction payloads.
//!
//! Each extraction round returns a partial value for the caller's schema.
//! Rounds are folded together guided by that schema:
//!
//! - objects merge field by field, so a round that omits a field keeps it;
//! - arrays are replaced whole by the newest round's array;
//! - scalars take the newest non-null value.

use serde_json::{Map as JsonMap, Value};

/// Fold `update` into `prior` according to `schema`.
///
/// `update` is expected to be metadata-free, as produced by
/// [`ExtractionResponse::new`](crate::types::ExtractionResponse::new).
pub fn merge_partial(schema: &Value, prior: Value, update: Value) -> Value {
    merge_value(schema, prior, update)
}

fn merge_value(schema: &Value, prior: Value, update: Value) -> Value {
    if update.is_null() {
        return prior;
    }

    match (schema_type(schema), prior, update) {
        (Some("object") | None, Value::Object(prior), Value::Object(update)) => {
            Value::Object(merge_object(schema, prior, update))
        }
        (_, _, update) => update,
    }
}

fn merge_object(
    schema: &Value,
    mut prior: JsonMap<String, Value>,
    update: JsonMap<String, Value>,
) -> JsonMap<String, Value> {
    for (key, value) in update {
        let property_schema = schema
            .get("properties")
            .and_then(|properties| properties.get(&key))
            .unwrap_or(&Value::Null);
        let merged = match prior.remove(&key) {
            Some(existing) => merge_value(property_schema, existing, value),
            None => value,
        };
        prior.insert(key, merged);
    }
    prior
}

// `type` may be a single name or a union such as ["array", "null"].
fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(name) => Some(name.as_str()),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "name": { "type": "string" } }
                    }
                },
                "stats": {
                    "type": "object",
                    "properties": { "count": { "type": "integer" }, "tags": { "type": ["array", "null"] } }
                }
            }
        })
    }

    #[test]
    fn arrays_take_the_latest_round() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "items": [{ "name": "a" }, { "name": "b" }] }),
            json!({ "items": [{ "name": "a" }, { "name": "b" }, { "name": "c" }] }),
        );
        assert_eq!(
            merged,
            json!({ "items": [{ "name": "a" }, { "name": "b" }, { "name": "c" }] })
        );
    }

    #[test]
    fn repeated_array_items_survive() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "items": [{ "name": "9.99" }] }),
            json!({ "items": [{ "name": "9.99" }, { "name": "9.99" }] }),
        );
        assert_eq!(merged, json!({ "items": [{ "name": "9.99" }, { "name": "9.99" }] }));
    }

    #[test]
    fn corrected_array_item_replaces_stale_one() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "items": [{ "name": "Wigdet" }] }),
            json!({ "items": [{ "name": "Widget" }] }),
        );
        assert_eq!(merged, json!({ "items": [{ "name": "Widget" }] }));
    }

    #[test]
    fn null_array_keeps_prior_items() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "stats": { "tags": ["x"] } }),
            json!({ "stats": { "tags": null } }),
        );
        assert_eq!(merged, json!({ "stats": { "tags": ["x"] } }));
    }

    #[test]
    fn scalars_overwrite_but_null_keeps_prior() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "title": "Old", "stats": { "count": 2 } }),
            json!({ "title": null, "stats": { "count": 5 } }),
        );
        assert_eq!(merged, json!({ "title": "Old", "stats": { "count": 5 } }));
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let merged = merge_partial(
            &listing_schema(),
            json!({ "stats": { "count": 1, "tags": ["x"] } }),
            json!({ "stats": { "tags": ["x", "y"] } }),
        );
        assert_eq!(merged, json!({ "stats": { "count": 1, "tags": ["x", "y"] } }));
    }

    #[test]
    fn arrays_without_schema_are_replaced() {
        let merged = merge_partial(&Value::Null, json!({ "list": [1] }), json!({ "list": [2] }));
        assert_eq!(merged, json!({ "list": [2] }));
    }

    #[test]
    fn mismatched_shapes_take_the_update() {
        let schema = json!({ "type": "object" });
        assert_eq!(merge_partial(&schema, json!({}), json!([1, 2])), json!([1, 2]));
    }
}
