//! JSON Schema gate shared by both wire formats.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;

const ACTION_SCHEMA: &str = include_str!("../../../schemas/action_document.schema.json");

static VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(ACTION_SCHEMA).map_err(|e| e.to_string())?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|e| e.to_string())
});

/// Validate `instance` against the bundled action document schema (Draft 2020-12).
///
/// Returns one message per violation; empty means the instance conforms.
pub fn schema_errors(instance: &Value) -> Vec<String> {
    match &*VALIDATOR {
        Ok(validator) => validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect(),
        Err(err) => vec![format!("compile action schema: {err}")],
    }
}
