//! Folding streamed completion deltas into a full message.

use serde_json::{Map, Value};
use tracing::warn;

/// Recursively merge `source` into `target`.
///
/// Strings concatenate, objects merge field by field, everything else overwrites.
pub fn merge_fields(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::String(existing)), Value::String(more)) => existing.push_str(more),
            (Some(Value::Object(existing)), Value::Object(more)) => merge_fields(existing, more),
            (Some(Value::Null) | None, Value::Object(more)) => {
                let mut fresh = Map::new();
                merge_fields(&mut fresh, more);
                target.insert(key.clone(), Value::Object(fresh));
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge one streamed delta into the accumulating message.
///
/// `role` is ignored. `tool_calls` entries are merged by their `index`.
pub fn merge_chunk(message: &mut Map<String, Value>, delta: &Value) {
    let Some(delta) = delta.as_object() else {
        return;
    };

    let mut rest = delta.clone();
    rest.remove("role");
    let tool_calls = rest.remove("tool_calls");
    merge_fields(message, &rest);

    let Some(Value::Array(calls)) = tool_calls else {
        return;
    };

    let slot = message
        .entry("tool_calls")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(existing) = slot else {
        return;
    };

    for call in calls {
        let Some(call) = call.as_object() else {
            continue;
        };
        let requested = call
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| usize::try_from(i).ok());
        let index = match requested {
            Some(i) if i <= existing.len() => i,
            Some(i) => {
                warn!(
                    index = i,
                    known = existing.len(),
                    "Tool-call delta index out of range, appending"
                );
                existing.len()
            }
            None => existing.len(),
        };
        if index == existing.len() {
            existing.push(Value::Object(Map::new()));
        }
        let mut fields = call.clone();
        fields.remove("index");
        if let Value::Object(entry) = &mut existing[index] {
            merge_fields(entry, &fields);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fold(deltas: &[Value]) -> Map<String, Value> {
        let mut message = Map::new();
        for delta in deltas {
            merge_chunk(&mut message, delta);
        }
        message
    }

    #[test]
    fn test_content_concatenates_in_order() {
        let pieces = ["Hel", "lo, ", "", "wor", "ld"];
        let deltas: Vec<Value> = pieces.iter().map(|p| json!({"content": p})).collect();
        let message = fold(&deltas);
        assert_eq!(message["content"], pieces.concat());
    }

    #[test]
    fn test_role_is_dropped() {
        let message = fold(&[json!({"role": "assistant", "content": "hi"})]);
        assert!(message.get("role").is_none());
    }

    #[test]
    fn test_tool_calls_merge_by_index() {
        let message = fold(&[
            json!({"tool_calls": [{"index": 0, "id": "call_a", "type": "function",
                "function": {"name": "transfer_to_sales", "arguments": ""}}]}),
            json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"req"}}]}),
            json!({"tool_calls": [{"index": 1, "id": "call_b",
                "function": {"name": "lookup", "arguments": "{}"}}]}),
            json!({"tool_calls": [{"index": 0, "function": {"arguments": "uest\":\"buy\"}"}}]}),
        ]);
        let calls = message["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["id"], "call_a");
        assert_eq!(calls[0]["function"]["name"], "transfer_to_sales");
        assert_eq!(calls[0]["function"]["arguments"], "{\"request\":\"buy\"}");
        assert_eq!(calls[1]["function"]["name"], "lookup");
        assert!(calls[0].get("index").is_none());
    }

    #[test]
    fn test_out_of_range_index_appends() {
        let message = fold(&[
            json!({"tool_calls": [{"index": 0, "id": "call_a", "function": {"name": "a"}}]}),
            json!({"tool_calls": [{"index": 1_000_000_000_000u64, "id": "call_b",
                "function": {"name": "b"}}]}),
        ]);
        let calls = message["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["id"], "call_b");
    }

    #[test]
    fn test_non_string_fields_overwrite() {
        let mut target = json!({"n": 1, "flag": true}).as_object().unwrap().clone();
        merge_fields(&mut target, json!({"n": 2}).as_object().unwrap());
        assert_eq!(target["n"], 2);
        assert_eq!(target["flag"], true);
    }

    #[test]
    fn test_null_refusal_then_text() {
        let message = fold(&[json!({"refusal": null}), json!({"refusal": "no"})]);
        assert_eq!(message["refusal"], "no");
    }
}
