//! Prompt rendering for completion requests.

use std::fmt;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::action::{ActionDocument, ActionKind, Interpreter, ScriptDescriptor};
use crate::core::codec::{WireFormat, encode};
use crate::io::sandbox::ExecutionResult;

const REQUEST_TEMPLATE: &str = include_str!("prompts/request.md");

/// Session flavour; selects prompt wording and the history file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Chat,
    Dev,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Dev => "dev",
        }
    }

    pub fn history_file(self) -> &'static str {
        match self {
            Mode::Chat => "chat_history.json",
            Mode::Dev => "dev_history.json",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Solve a task (dev mode and one-shot commands).
    Process,
    Chat,
    /// Follow-up carrying a script's captured output.
    Analyze,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            RequestKind::Process => "process",
            RequestKind::Chat => "chat",
            RequestKind::Analyze => "analyze",
        }
    }
}

/// Everything a prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub kind: RequestKind,
    /// Operator question; for `Analyze`, the original question.
    pub issue: &'a str,
    pub mode: Mode,
    pub script_output: Option<&'a ExecutionResult>,
    pub system_info: Option<&'a str>,
    pub wire_format: WireFormat,
}

/// Template engine wrapper around minijinja.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl PromptRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("request", REQUEST_TEMPLATE)
            .context("load request template")?;
        Ok(Self { env })
    }

    pub fn render(&self, request: &PromptRequest<'_>) -> Result<String> {
        let template = self.env.get_template("request")?;
        let output = request.script_output;
        let format_name = match request.wire_format {
            WireFormat::Markup => "XML",
            WireFormat::Json => "JSON",
        };
        let rendered = template
            .render(context! {
                kind => request.kind.as_str(),
                issue => request.issue.trim(),
                mode => request.mode.as_str(),
                exit_code => output.map(|o| o.exit_code),
                timed_out => output.is_some_and(|o| o.timed_out),
                stdout => output.map(|o| o.stdout.trim_end()),
                stderr => output.map(|o| o.stderr.trim_end()),
                system_info => request.system_info.map(str::trim).filter(|s| !s.is_empty()),
                format_name => format_name,
                format_example => format_example(request.wire_format),
            })
            .context("render request prompt")?;
        Ok(rendered)
    }
}

/// A sample `run` document in the requested format.
fn format_example(format: WireFormat) -> String {
    let sample = ActionDocument {
        message: Some("Checking free disk space.".to_string()),
        script: Some(ScriptDescriptor {
            filename: "check_disk.sh".to_string(),
            content: "#!/bin/bash\ndf -h\n".to_string(),
            interpreter: Interpreter::Shell,
            description: Some("Show disk usage".to_string()),
            prepare: None,
        }),
        confirm_message: Some("Run the disk check?".to_string()),
        ..ActionDocument::new(ActionKind::Run)
    };
    encode(&sample, format)
}
