//! Action document model shared by the codec, the engine and the I/O adapters.
//!
//! An [`ActionDocument`] is the format-agnostic decision returned by the
//! completion collaborator. It is built fresh from each decoded reply and never
//! mutated afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::validate::InvalidDocument;

/// What the model wants the agent to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Chat,
    Show,
    Input,
    Create,
    Run,
    Analyze,
    Done,
    Error,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Chat => "chat",
            ActionKind::Show => "show",
            ActionKind::Input => "input",
            ActionKind::Create => "create",
            ActionKind::Run => "run",
            ActionKind::Analyze => "analyze",
            ActionKind::Done => "done",
            ActionKind::Error => "error",
        }
    }

    /// True for kinds that must carry a [`ScriptDescriptor`].
    pub fn requires_script(self) -> bool {
        matches!(self, ActionKind::Create | ActionKind::Run)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = InvalidDocument;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "" => return Err(InvalidDocument::MissingKind),
            "chat" => ActionKind::Chat,
            "show" => ActionKind::Show,
            "input" => ActionKind::Input,
            "create" => ActionKind::Create,
            "run" => ActionKind::Run,
            "analyze" | "analyse" => ActionKind::Analyze,
            "done" => ActionKind::Done,
            "error" => ActionKind::Error,
            other => return Err(InvalidDocument::UnknownKind(other.to_string())),
        };
        Ok(kind)
    }
}

/// Interpreter used to run a materialized script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpreter {
    Shell,
    Node,
    Python,
    Php,
    /// Invoked directly; the file gets an executable bit.
    Executable,
}

impl Interpreter {
    /// Map a wire `type` tag (`sh`, `js`, `python`, ...) to an interpreter.
    pub fn from_type_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "sh" | "bash" | "shell" | "zsh" => Interpreter::Shell,
            "js" | "javascript" | "node" | "nodejs" | "mjs" | "cjs" => Interpreter::Node,
            "py" | "python" | "python3" => Interpreter::Python,
            "php" => Interpreter::Php,
            _ => Interpreter::Executable,
        }
    }

    /// Infer an interpreter from the filename extension.
    pub fn from_filename(filename: &str) -> Self {
        match filename.rsplit_once('.') {
            Some((_, ext)) => Self::from_type_tag(ext),
            None => Interpreter::Executable,
        }
    }

    /// Canonical wire tag. `from_type_tag(x.type_tag()) == x` for every variant.
    pub fn type_tag(self) -> &'static str {
        match self {
            Interpreter::Shell => "sh",
            Interpreter::Node => "js",
            Interpreter::Python => "py",
            Interpreter::Php => "php",
            Interpreter::Executable => "exe",
        }
    }

    /// Program used to run a script of this type, or `None` for direct invocation.
    pub fn program(self) -> Option<&'static str> {
        match self {
            Interpreter::Shell => Some("bash"),
            Interpreter::Node => Some("node"),
            Interpreter::Python => Some("python3"),
            Interpreter::Php => Some("php"),
            Interpreter::Executable => None,
        }
    }

    pub fn requires_direct_invocation(self) -> bool {
        self.program().is_none()
    }
}

/// A script (or static file) the model asked to create and optionally run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    /// Path relative to the sandbox root.
    pub filename: String,
    /// Full file content, never truncated.
    pub content: String,
    pub interpreter: Interpreter,
    pub description: Option<String>,
    /// Free-text dependency install command; only meaningful for `run`.
    pub prepare: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Decoded decision returned by the completion collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDocument {
    pub kind: ActionKind,
    pub message: Option<String>,
    pub script: Option<ScriptDescriptor>,
    /// Overrides the default yes/no prompt text.
    pub confirm_message: Option<String>,
    pub input_label: Option<String>,
    pub input_description: Option<String>,
    /// Authoritative history when present (replaces local history).
    pub history: Option<Vec<HistoryEntry>>,
}

impl ActionDocument {
    /// A bare document of `kind` with no optional fields.
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            message: None,
            script: None,
            confirm_message: None,
            input_label: None,
            input_description: None,
            history: None,
        }
    }

    /// A `chat` document carrying `message`.
    pub fn chat(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(ActionKind::Chat)
        }
    }

    /// The message with surrounding whitespace removed, if non-empty.
    pub fn message_text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether this kind ends an analyze chain.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Chat
                | ActionKind::Show
                | ActionKind::Done
                | ActionKind::Error
                | ActionKind::Analyze
        )
    }
}
