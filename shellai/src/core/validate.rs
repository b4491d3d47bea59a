//! Invariant checks for decoded action documents.
//!
//! Every document the engine acts on passes through [`validate`] first, so
//! downstream code can rely on `script.is_some() == kind.requires_script()`
//! and on the filename being a plain relative path.

use std::path::{Component, Path};

use thiserror::Error;

use crate::core::action::{ActionDocument, ScriptDescriptor};

/// A filename that would resolve outside the sandbox root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path escapes sandbox root: {path}")]
pub struct SandboxViolation {
    pub path: String,
}

/// Why a document cannot be acted on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDocument {
    #[error("document has no action kind")]
    MissingKind,
    #[error("unrecognized action kind `{0}`")]
    UnknownKind(String),
    #[error("action `{0}` requires a script")]
    MissingScript(String),
    #[error("action `{0}` must not carry a script")]
    UnexpectedScript(String),
    #[error("script filename is empty")]
    EmptyFilename,
    #[error(transparent)]
    Sandbox(#[from] SandboxViolation),
}

/// Check the structural invariants of `doc`.
pub fn validate(doc: &ActionDocument) -> Result<(), InvalidDocument> {
    match (&doc.script, doc.kind.requires_script()) {
        (None, true) => return Err(InvalidDocument::MissingScript(doc.kind.to_string())),
        (Some(_), false) => return Err(InvalidDocument::UnexpectedScript(doc.kind.to_string())),
        _ => {}
    }
    if let Some(script) = &doc.script {
        validate_script(script)?;
    }
    Ok(())
}

fn validate_script(script: &ScriptDescriptor) -> Result<(), InvalidDocument> {
    if script.filename.trim().is_empty() {
        return Err(InvalidDocument::EmptyFilename);
    }
    check_contained(&script.filename)?;
    Ok(())
}

/// Reject absolute paths and any path containing a parent component.
///
/// Checked again by the sandbox right before writing.
pub fn check_contained(filename: &str) -> Result<(), SandboxViolation> {
    let violation = || SandboxViolation {
        path: filename.to_string(),
    };
    // Backslash separators are treated as separators on every platform.
    let normalized = filename.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(violation());
    }
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(violation());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::{ActionKind, Interpreter};

    fn script(filename: &str) -> ScriptDescriptor {
        ScriptDescriptor {
            filename: filename.to_string(),
            content: "echo hi".to_string(),
            interpreter: Interpreter::Shell,
            description: None,
            prepare: None,
        }
    }

    fn run_doc(filename: &str) -> ActionDocument {
        ActionDocument {
            script: Some(script(filename)),
            ..ActionDocument::new(ActionKind::Run)
        }
    }

    #[test]
    fn run_without_script_is_rejected() {
        let doc = ActionDocument::new(ActionKind::Run);
        assert_eq!(
            validate(&doc),
            Err(InvalidDocument::MissingScript("run".to_string()))
        );
    }

    #[test]
    fn chat_with_script_is_rejected() {
        let doc = ActionDocument {
            script: Some(script("a.sh")),
            ..ActionDocument::chat("hi")
        };
        assert_eq!(
            validate(&doc),
            Err(InvalidDocument::UnexpectedScript("chat".to_string()))
        );
    }

    /// Verifies every parent-relative or absolute filename is rejected.
    #[test]
    fn escaping_filenames_are_rejected() {
        for name in [
            "../a.sh",
            "sub/../../a.sh",
            "/etc/passwd",
            "..\\a.sh",
            "ok/..",
        ] {
            let err = validate(&run_doc(name)).unwrap_err();
            assert!(
                matches!(err, InvalidDocument::Sandbox(_)),
                "expected sandbox violation for {name}, got {err:?}"
            );
        }
    }

    #[test]
    fn nested_relative_filenames_are_accepted() {
        validate(&run_doc("tools/check.sh")).expect("nested ok");
        validate(&run_doc("./a.sh")).expect("curdir ok");
    }

    #[test]
    fn empty_filename_is_rejected() {
        assert_eq!(
            validate(&run_doc("  ")),
            Err(InvalidDocument::EmptyFilename)
        );
    }
}
