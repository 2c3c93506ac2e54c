//! Run-scoped context variables.

use std::collections::HashMap;

use serde_json::Value;

/// String-to-string mapping threaded through every turn and tool call.
pub type ContextVariables = HashMap<String, String>;

/// Parameter name reserved for injected context variables. Never shown to the model.
pub const CONTEXT_VARIABLES_PARAM: &str = "context_variables";

/// Shallow merge, last write wins.
pub fn merge_context(target: &mut ContextVariables, update: &ContextVariables) {
    for (key, value) in update {
        target.insert(key.clone(), value.clone());
    }
}

/// Coerce an arbitrary JSON mapping into string values.
///
/// Strings are kept as-is; every other value is rendered as JSON text.
pub fn coerce_context(map: &serde_json::Map<String, Value>) -> ContextVariables {
    map.iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
