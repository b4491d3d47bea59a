//! JSON wire form and the conversion from wire values to [`ActionDocument`].
//!
//! Both wire formats end up here: markup replies are projected to a
//! [`serde_json::Value`] first, so there is exactly one place that maps loose
//! wire fields onto the typed document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::action::{ActionDocument, ActionKind, HistoryEntry, Interpreter, ScriptDescriptor};
use crate::core::validate::InvalidDocument;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<WireScript>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireScript {
    pub filename: String,
    pub content: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare: Option<String>,
}

/// Unwrap an API envelope `{"success": .., "data": {..}, "history": [..]}`.
///
/// The envelope's history is used when `data` carries none. A failed envelope
/// without data becomes an `error` document.
pub(crate) fn unwrap_envelope(value: Value) -> Value {
    let Value::Object(mut outer) = value else {
        return value;
    };
    if !outer.contains_key("success") {
        return Value::Object(outer);
    }
    match outer.remove("data") {
        Some(Value::Object(mut data)) => {
            let data_has_history = data.get("history").is_some_and(|h| !h.is_null());
            if !data_has_history && let Some(history) = outer.remove("history") {
                data.insert("history".to_string(), history);
            }
            Value::Object(data)
        }
        _ if outer.get("success") == Some(&Value::Bool(false)) => {
            let reason = outer
                .get("error")
                .or_else(|| outer.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            serde_json::json!({"action": "error", "message": reason})
        }
        Some(other) => {
            outer.insert("data".to_string(), other);
            Value::Object(outer)
        }
        None => Value::Object(outer),
    }
}

/// `kind` is accepted as a synonym for `action`.
pub(crate) fn normalize_kind_field(value: &mut Value) {
    if let Value::Object(fields) = value {
        let has_action = fields.get("action").is_some_and(|v| !v.is_null());
        if !has_action && let Some(kind) = fields.remove("kind") {
            fields.insert("action".to_string(), kind);
        } else {
            fields.remove("kind");
        }
    }
}

impl WireDocument {
    pub(crate) fn into_document(self) -> Result<ActionDocument, InvalidDocument> {
        let kind: ActionKind = self
            .action
            .as_deref()
            .ok_or(InvalidDocument::MissingKind)?
            .parse()?;
        Ok(ActionDocument {
            kind,
            message: non_empty(self.message),
            script: self.script.map(WireScript::into_descriptor),
            confirm_message: non_empty(self.confirm_message),
            input_label: non_empty(self.input_label),
            input_description: non_empty(self.input_description),
            history: self.history,
        })
    }

    pub(crate) fn from_document(doc: &ActionDocument) -> Self {
        Self {
            action: Some(doc.kind.as_str().to_string()),
            message: doc.message.clone(),
            script: doc.script.as_ref().map(WireScript::from_descriptor),
            confirm_message: doc.confirm_message.clone(),
            input_label: doc.input_label.clone(),
            input_description: doc.input_description.clone(),
            history: doc.history.clone(),
        }
    }
}

impl WireScript {
    fn into_descriptor(self) -> ScriptDescriptor {
        let filename = self.filename.trim().to_string();
        let interpreter = match non_empty(self.type_tag) {
            Some(tag) => Interpreter::from_type_tag(&tag),
            None => Interpreter::from_filename(&filename),
        };
        ScriptDescriptor {
            filename,
            content: self.content,
            interpreter,
            description: non_empty(self.description),
            prepare: non_empty(self.prepare),
        }
    }

    fn from_descriptor(script: &ScriptDescriptor) -> Self {
        Self {
            filename: script.filename.clone(),
            content: script.content.clone(),
            type_tag: Some(script.interpreter.type_tag().to_string()),
            description: script.description.clone(),
            prepare: script.prepare.clone(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Compact JSON form of `doc`.
pub fn encode(doc: &ActionDocument) -> String {
    let wire = WireDocument::from_document(doc);
    // A struct of strings and options always serializes.
    serde_json::to_string(&wire).unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_is_unwrapped_with_outer_history() {
        let value = unwrap_envelope(json!({
            "success": true,
            "data": {"action": "chat", "message": "hi"},
            "history": [{"role": "user", "content": "q"}]
        }));
        assert_eq!(
            value,
            json!({
                "action": "chat",
                "message": "hi",
                "history": [{"role": "user", "content": "q"}]
            })
        );
    }

    #[test]
    fn failed_envelope_becomes_error_document() {
        let value = unwrap_envelope(json!({"success": false, "error": "quota exceeded"}));
        assert_eq!(value, json!({"action": "error", "message": "quota exceeded"}));
    }

    #[test]
    fn kind_is_accepted_for_action() {
        let mut value = json!({"kind": "done"});
        normalize_kind_field(&mut value);
        assert_eq!(value, json!({"action": "done"}));
    }

    #[test]
    fn missing_type_falls_back_to_extension() {
        let wire: WireDocument = serde_json::from_value(json!({
            "action": "run",
            "script": {"filename": " check.py ", "content": "print(1)"}
        }))
        .expect("wire");
        let doc = wire.into_document().expect("doc");
        let script = doc.script.expect("script");
        assert_eq!(script.filename, "check.py");
        assert_eq!(script.interpreter, Interpreter::Python);
    }

    #[test]
    fn empty_optionals_become_none() {
        let wire: WireDocument =
            serde_json::from_value(json!({"action": "chat", "message": "  "})).expect("wire");
        assert_eq!(wire.into_document().expect("doc").message, None);
    }
}
