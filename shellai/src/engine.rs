//! Orchestration engine: one operator request in, one terminal [`Outcome`] out.
//!
//! The engine obtains a decision from the completion collaborator, validates
//! it and acts on it. A `run` decision executes a script and resubmits the
//! captured output as an `analyze` request; an `input` decision asks the
//! operator for a value and resubmits the question. Both resubmissions happen
//! inside an explicit [`Chain`] loop bounded by `max_chain_iterations`.
//!
//! Only the first script of a chain is confirmed. Follow-up scripts returned
//! while analyzing are continuations of work the operator already approved.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ActionDocument, ActionKind, HistoryEntry, ScriptDescriptor};
use crate::core::codec::decode;
use crate::core::validate::{SandboxViolation, validate};
use crate::exit_codes;
use crate::io::completion::Completion;
use crate::io::config::AgentConfig;
use crate::io::console::{ConfirmationGate, Confirmer, Console, Notice};
use crate::io::packages::{InstallReport, PackageManager, PackageStatus, resolve};
use crate::io::prompt::{Mode, PromptRenderer, PromptRequest, RequestKind};
use crate::io::sandbox::{ExecutionResult, Sandbox, cleanup, execute};

/// An operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub question: String,
}

impl Request {
    pub fn process(question: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Process,
            question: question.into(),
        }
    }

    pub fn chat(question: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Chat,
            question: question.into(),
        }
    }
}

/// Terminal result of one request. Each carries exactly one operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Chat(String),
    Show(String),
    Done(String),
    /// The model closed the chain with its own analysis.
    Analysis(String),
    Error(String),
    Declined(String),
    FileWritten(PathBuf),
    IterationLimit(u32),
}

impl Outcome {
    pub fn notice(&self) -> Notice {
        match self {
            Outcome::Chat(_) | Outcome::Show(_) | Outcome::Analysis(_) => Notice::Reply,
            Outcome::Done(_) | Outcome::FileWritten(_) => Notice::Success,
            Outcome::Declined(_) => Notice::Info,
            Outcome::Error(_) | Outcome::IterationLimit(_) => Notice::Error,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Error(_) => exit_codes::ERROR,
            Outcome::Declined(_) => exit_codes::DECLINED,
            Outcome::IterationLimit(_) => exit_codes::LIMIT,
            _ => exit_codes::OK,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Chat(message)
            | Outcome::Show(message)
            | Outcome::Done(message)
            | Outcome::Analysis(message)
            | Outcome::Error(message)
            | Outcome::Declined(message) => f.write_str(message),
            Outcome::FileWritten(path) => write!(f, "Created {}", path.display()),
            Outcome::IterationLimit(limit) => write!(
                f,
                "Stopped after {limit} follow-up requests without a final answer."
            ),
        }
    }
}

/// State carried between iterations of one request.
#[derive(Debug)]
struct Chain {
    document: ActionDocument,
    /// Resubmissions made so far.
    iteration: u32,
    /// Operator approved a script earlier in this chain.
    approved: bool,
    /// Question resubmitted with follow-ups; grows with `input` answers.
    question: String,
    kind: RequestKind,
}

pub struct Engine<'a, C, K, P>
where
    C: Completion + ?Sized,
    K: Console + ?Sized,
    P: PackageManager + ?Sized,
{
    config: &'a AgentConfig,
    completion: &'a C,
    console: &'a mut K,
    packages: &'a P,
    sandbox: Sandbox,
    renderer: PromptRenderer,
    mode: Mode,
    history: Vec<HistoryEntry>,
    /// Sent with the next request only.
    system_info: Option<String>,
}

impl<'a, C, K, P> Engine<'a, C, K, P>
where
    C: Completion + ?Sized,
    K: Console + ?Sized,
    P: PackageManager + ?Sized,
{
    pub fn new(
        config: &'a AgentConfig,
        completion: &'a C,
        console: &'a mut K,
        packages: &'a P,
        mode: Mode,
    ) -> Result<Self> {
        Ok(Self {
            config,
            completion,
            console,
            packages,
            sandbox: Sandbox::new(&config.sandbox_dir),
            renderer: PromptRenderer::new()?,
            mode,
            history: Vec::new(),
            system_info: None,
        })
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_info(mut self, system_info: Option<String>) -> Self {
        self.system_info = system_info;
        self
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn console(&mut self) -> &mut K {
        self.console
    }

    /// Drive `request` to a terminal outcome and show its message.
    #[instrument(skip_all, fields(mode = %self.mode, kind = ?request.kind))]
    pub fn handle(&mut self, request: Request) -> Outcome {
        let outcome = self.drive(request);
        info!(?outcome, "request finished");
        self.console.notify(outcome.notice(), &outcome.to_string());
        outcome
    }

    fn drive(&mut self, request: Request) -> Outcome {
        let kind = match request.kind {
            RequestKind::Analyze => RequestKind::Process,
            other => other,
        };
        let first = PromptRequest {
            kind,
            issue: &request.question,
            mode: self.mode,
            script_output: None,
            system_info: None,
            wire_format: self.config.wire_format,
        };
        let user_turn = HistoryEntry::user(request.question.trim());
        let document = match self.ask(first, Some(user_turn)) {
            Ok(document) => document,
            Err(outcome) => return outcome,
        };
        let mut chain = Chain {
            document,
            iteration: 0,
            approved: false,
            question: request.question,
            kind,
        };

        loop {
            if let Err(err) = validate(&chain.document) {
                warn!(err = %err, "invalid action document");
                return Outcome::Error(format!("Invalid action document: {err}"));
            }
            let doc = &chain.document;
            debug!(kind = %doc.kind, iteration = chain.iteration, "acting on decision");
            match doc.kind {
                ActionKind::Chat => return Outcome::Chat(message_or(doc, "(no message)")),
                ActionKind::Show => return Outcome::Show(message_or(doc, "(nothing to show)")),
                ActionKind::Done => return Outcome::Done(message_or(doc, "Done.")),
                ActionKind::Analyze => return Outcome::Analysis(message_or(doc, "(no analysis)")),
                ActionKind::Error => {
                    return Outcome::Error(message_or(doc, "The assistant reported an error."));
                }
                ActionKind::Create => return self.create(doc),
                ActionKind::Input | ActionKind::Run => {}
            }

            if chain.iteration >= self.config.max_chain_iterations {
                warn!(limit = chain.iteration, "chain iteration bound reached");
                return Outcome::IterationLimit(chain.iteration);
            }

            let next = if doc.kind == ActionKind::Input {
                let (label, answer) = match self.collect_input(&chain.document) {
                    Ok(answer) => answer,
                    Err(outcome) => return outcome,
                };
                chain.question = format!("{}\n\n{label}: {answer}", chain.question.trim_end());
                let request = PromptRequest {
                    kind: chain.kind,
                    issue: &chain.question,
                    mode: self.mode,
                    script_output: None,
                    system_info: None,
                    wire_format: self.config.wire_format,
                };
                self.ask(request, Some(HistoryEntry::user(format!("{label}: {answer}"))))
            } else {
                let result = match self.run_script(&mut chain) {
                    Ok(result) => result,
                    Err(outcome) => return outcome,
                };
                let request = PromptRequest {
                    kind: RequestKind::Analyze,
                    issue: &chain.question,
                    mode: self.mode,
                    script_output: Some(&result),
                    system_info: None,
                    wire_format: self.config.wire_format,
                };
                self.ask(request, None)
            };
            chain.iteration += 1;
            chain.document = match next {
                Ok(document) => document,
                Err(outcome) => return outcome,
            };
        }
    }

    /// One round trip to the completion collaborator.
    ///
    /// `user_turn` is recorded once the call returns. The decoded decision is
    /// then folded into history: server history replaces ours, otherwise the
    /// assistant's message is appended.
    fn ask(
        &mut self,
        request: PromptRequest<'_>,
        user_turn: Option<HistoryEntry>,
    ) -> Result<ActionDocument, Outcome> {
        let system_info = self.system_info.take();
        let request = PromptRequest {
            system_info: system_info.as_deref(),
            ..request
        };
        let prompt = self
            .renderer
            .render(&request)
            .map_err(|err| Outcome::Error(format!("Could not build prompt: {err:#}")))?;

        let reply = self.completion.complete(&prompt, &self.history);
        if let Some(turn) = user_turn {
            self.history.push(turn);
        }
        let raw = reply.map_err(|err| {
            warn!(err = %err, "completion failed");
            Outcome::Error(format!("Completion request failed: {err:#}"))
        })?;

        let decoded = decode(&raw).map_err(|err| {
            warn!(err = %err, "undecodable reply");
            debug!(raw = err.raw(), "raw reply");
            Outcome::Error(format!("Could not understand the assistant's reply: {err}"))
        })?;
        self.record_decision(&decoded.document);
        Ok(decoded.document)
    }

    fn record_decision(&mut self, doc: &ActionDocument) {
        if let Some(history) = &doc.history {
            self.history = history.clone();
            return;
        }
        let content = match (doc.message_text(), &doc.script) {
            (Some(message), _) => message.to_string(),
            (None, Some(script)) => format!("AI created a script: {}", script.filename),
            (None, None) => format!("[{}]", doc.kind),
        };
        self.history.push(HistoryEntry::assistant(content));
    }

    fn confirm(&mut self, prompt: &str) -> bool {
        ConfirmationGate::new(&mut *self.console).confirm(prompt)
    }

    fn show_message(&mut self, doc: &ActionDocument) {
        if let Some(message) = doc.message_text() {
            self.console.notify(Notice::Reply, message);
        }
    }

    fn create(&mut self, doc: &ActionDocument) -> Outcome {
        let Some(script) = &doc.script else {
            return Outcome::Error("create action has no file".to_string());
        };
        self.show_message(doc);
        let prompt = doc
            .confirm_message
            .clone()
            .unwrap_or_else(|| format!("Create file {}?", script.filename));
        if !self.confirm(&prompt) {
            return Outcome::Declined("File creation cancelled.".to_string());
        }
        match Sandbox::write_static(script, &self.config.output_dir) {
            Ok(path) => Outcome::FileWritten(path),
            Err(err) => Outcome::Error(write_failure(&err, &script.filename)),
        }
    }

    fn collect_input(&mut self, doc: &ActionDocument) -> Result<(String, String), Outcome> {
        self.show_message(doc);
        if let Some(description) = doc.input_description.as_deref() {
            self.console.notify(Notice::Info, description);
        }
        let label = doc
            .input_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or("Value")
            .to_string();
        match self.console.read_line(&format!("{label}: ")) {
            Ok(Some(answer)) if !answer.trim().is_empty() => Ok((label, answer.trim().to_string())),
            Ok(_) => Err(Outcome::Declined(
                "No input provided; request cancelled.".to_string(),
            )),
            Err(err) => Err(Outcome::Error(format!("Could not read input: {err:#}"))),
        }
    }

    /// Dependencies, confirmation, materialize, execute, cleanup.
    fn run_script(&mut self, chain: &mut Chain) -> Result<ExecutionResult, Outcome> {
        let doc = &chain.document;
        let Some(script) = &doc.script else {
            return Err(Outcome::Error("run action has no script".to_string()));
        };
        self.show_message(doc);

        if let Some(prepare) = script.prepare.as_deref() {
            let report = {
                let mut gate = ConfirmationGate::new(&mut *self.console);
                resolve(prepare, self.packages, &mut gate)
            };
            self.report_install(&report);
        }

        if !chain.approved {
            let prompt = doc
                .confirm_message
                .clone()
                .unwrap_or_else(|| default_run_prompt(script));
            if !self.confirm(&prompt) {
                return Err(Outcome::Declined("Script execution cancelled.".to_string()));
            }
            chain.approved = true;
        }

        let path = self
            .sandbox
            .materialize(script)
            .map_err(|err| Outcome::Error(write_failure(&err, &script.filename)))?;
        self.console
            .notify(Notice::Working, &format!("Running {}", script.filename));
        let result = execute(
            &path,
            script.interpreter,
            &[],
            self.config.script_timeout(),
            self.config.output_limit_bytes,
        );
        if self.config.retain_scripts {
            self.console
                .notify(Notice::Info, &format!("Kept script at {}", path.display()));
        } else {
            cleanup(&path);
        }
        self.report_execution(&result);
        Ok(result)
    }

    fn report_install(&mut self, report: &InstallReport) {
        for (package, status) in &report.entries {
            match status {
                PackageStatus::AlreadyInstalled => {
                    debug!(package = %package, "already installed");
                }
                PackageStatus::Installed => self
                    .console
                    .notify(Notice::Success, &format!("Installed {package}")),
                PackageStatus::Skipped => self
                    .console
                    .notify(Notice::Info, &format!("Skipped {package}")),
                PackageStatus::Failed(reason) => self.console.notify(
                    Notice::Error,
                    &format!("Failed to install {package}: {reason}"),
                ),
            }
        }
        if report.failures().next().is_some() || report.skipped().next().is_some() {
            self.console.notify(
                Notice::Info,
                "Continuing without the missing packages; the script may fail.",
            );
        }
    }

    fn report_execution(&mut self, result: &ExecutionResult) {
        let stdout = result.stdout.trim_end();
        if !stdout.is_empty() {
            self.console.notify(Notice::Reply, stdout);
        }
        let stderr = result.stderr.trim_end();
        if !stderr.is_empty() {
            self.console.notify(Notice::Reply, stderr);
        }
        let summary = if result.timed_out {
            "Script timed out; analyzing output".to_string()
        } else {
            format!("Script exited with code {}; analyzing output", result.exit_code)
        };
        self.console.notify(Notice::Working, &summary);
    }
}

fn message_or(doc: &ActionDocument, fallback: &str) -> String {
    doc.message_text().unwrap_or(fallback).to_string()
}

fn default_run_prompt(script: &ScriptDescriptor) -> String {
    match script.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(description) => format!("Run {} ({description})?", script.filename),
        None => format!("Run {}?", script.filename),
    }
}

fn write_failure(err: &anyhow::Error, filename: &str) -> String {
    match err.downcast_ref::<SandboxViolation>() {
        Some(violation) => format!("Refused to write {filename}: {violation}"),
        None => format!("Could not write {filename}: {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePackages, ScriptedCompletion, ScriptedConsole, config_in};
    use serde_json::json;

    fn handle(
        config: &AgentConfig,
        completion: &ScriptedCompletion,
        console: &mut ScriptedConsole,
        packages: &FakePackages,
        request: Request,
    ) -> Outcome {
        let mut engine =
            Engine::new(config, completion, console, packages, Mode::Dev).expect("engine");
        engine.handle(request)
    }

    fn run_reply(filename: &str, content: &str) -> String {
        json!({
            "action": "run",
            "message": "Running a quick script.",
            "script": {"filename": filename, "content": content, "type": "sh"}
        })
        .to_string()
    }

    #[test]
    fn chat_reply_is_terminal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([r#"{"action":"chat","message":"Hello!"}"#]);
        let mut console = ScriptedConsole::default();

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::chat("hi"),
        );

        assert_eq!(outcome, Outcome::Chat("Hello!".to_string()));
        assert_eq!(completion.calls(), 1);
        assert_eq!(console.notices.last(), Some(&(Notice::Reply, "Hello!".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn confirmed_run_is_executed_and_analyzed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([
            run_reply("a.sh", "echo hi"),
            r#"{"action":"done","message":"The script printed hi."}"#.to_string(),
        ]);
        let mut console = ScriptedConsole::new(["y"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("say hi"),
        );

        assert_eq!(outcome, Outcome::Done("The script printed hi.".to_string()));
        assert_eq!(completion.calls(), 2);
        let analyze = &completion.prompts()[1];
        assert!(analyze.contains("Original request: say hi"));
        assert!(analyze.contains("Exit code: 0"));
        assert!(analyze.contains("hi"));
        assert!(console.saw("Running a.sh"));
        assert!(!config.sandbox_dir.join("a.sh").exists());
    }

    #[test]
    fn declined_run_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([run_reply("a.sh", "echo hi")]);
        let mut console = ScriptedConsole::new(["n"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("say hi"),
        );

        assert!(matches!(outcome, Outcome::Declined(_)));
        assert_eq!(outcome.exit_code(), exit_codes::DECLINED);
        assert_eq!(completion.calls(), 1);
        assert!(!config.sandbox_dir.join("a.sh").exists());
        assert_eq!(console.prompts, vec!["Run a.sh? (y/n): ".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn follow_up_runs_stop_at_the_iteration_bound() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig {
            max_chain_iterations: 2,
            ..config_in(temp.path())
        };
        let completion = ScriptedCompletion::repeating(run_reply("loop.sh", "echo again"));
        let mut console = ScriptedConsole::new(["y"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("keep going"),
        );

        assert_eq!(outcome, Outcome::IterationLimit(2));
        assert_eq!(outcome.exit_code(), exit_codes::LIMIT);
        assert_eq!(completion.calls(), 3);
        // Only the first script of the chain is confirmed.
        assert_eq!(console.prompts.len(), 1);
    }

    #[test]
    fn create_writes_file_after_confirmation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let reply = "Sure.\n<response>\n<action>create</action>\n<message>Here is your page</message>\n<script>\n<filename>site/index.html</filename>\n<content>&lt;h1&gt;Hello&lt;/h1&gt;</content>\n</script>\n</response>";
        let completion = ScriptedCompletion::new([reply]);
        let mut console = ScriptedConsole::new(["yes"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("make a landing page"),
        );

        let path = config.output_dir.join("site/index.html");
        assert_eq!(outcome, Outcome::FileWritten(path.clone()));
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "<h1>Hello</h1>"
        );
        assert_eq!(console.prompts, vec!["Create file site/index.html? (y/n): ".to_string()]);
    }

    #[test]
    fn declined_create_leaves_no_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([json!({
            "action": "create",
            "confirm_message": "Write notes.txt?",
            "script": {"filename": "notes.txt", "content": "todo"}
        })
        .to_string()]);
        let mut console = ScriptedConsole::new(["no"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("write notes"),
        );

        assert!(matches!(outcome, Outcome::Declined(_)));
        assert!(!config.output_dir.join("notes.txt").exists());
        assert_eq!(console.prompts, vec!["Write notes.txt? (y/n): ".to_string()]);
    }

    #[test]
    fn input_answer_is_resubmitted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([
            json!({
                "action": "input",
                "message": "Which port should I check?",
                "input_label": "Port",
                "input_description": "TCP port to probe"
            })
            .to_string(),
            r#"{"action":"chat","message":"Port 8080 is free."}"#.to_string(),
        ]);
        let mut console = ScriptedConsole::new(["8080"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("is my port free?"),
        );

        assert_eq!(outcome, Outcome::Chat("Port 8080 is free.".to_string()));
        assert_eq!(console.prompts, vec!["Port: ".to_string()]);
        assert!(console.saw("TCP port to probe"));
        assert!(completion.prompts()[1].contains("Port: 8080"));
    }

    #[test]
    fn missing_input_declines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion =
            ScriptedCompletion::new([r#"{"action":"input","input_label":"Domain"}"#]);
        let mut console = ScriptedConsole::default();

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("set up a vhost"),
        );

        assert!(matches!(outcome, Outcome::Declined(_)));
        assert_eq!(completion.calls(), 1);
    }

    #[test]
    fn escaping_filename_is_rejected_before_any_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([run_reply("../evil.sh", "rm -rf ~")]);
        let mut console = ScriptedConsole::new(["y"]);

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &FakePackages::default(),
            Request::process("clean up"),
        );

        assert!(matches!(&outcome, Outcome::Error(message) if message.contains("escapes")));
        assert!(console.prompts.is_empty());
        assert!(!temp.path().join("evil.sh").exists());
    }

    #[test]
    fn model_error_and_failures_end_with_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());

        let completion =
            ScriptedCompletion::new([r#"{"action":"error","message":"cannot do that"}"#]);
        let outcome = handle(
            &config,
            &completion,
            &mut ScriptedConsole::default(),
            &FakePackages::default(),
            Request::process("x"),
        );
        assert_eq!(outcome, Outcome::Error("cannot do that".to_string()));
        assert_eq!(outcome.exit_code(), exit_codes::ERROR);

        let completion = ScriptedCompletion::new(["   "]);
        let outcome = handle(
            &config,
            &completion,
            &mut ScriptedConsole::default(),
            &FakePackages::default(),
            Request::process("x"),
        );
        assert!(matches!(&outcome, Outcome::Error(m) if m.contains("Could not understand")));

        let completion =
            ScriptedCompletion::new(Vec::<String>::new()).then_fail("connection refused");
        let outcome = handle(
            &config,
            &completion,
            &mut ScriptedConsole::default(),
            &FakePackages::default(),
            Request::process("x"),
        );
        assert!(matches!(&outcome, Outcome::Error(m) if m.contains("connection refused")));
        assert_eq!(completion.calls(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn skipped_dependency_still_runs_the_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([
            json!({
                "action": "run",
                "script": {
                    "filename": "pad.sh",
                    "content": "echo padded",
                    "type": "sh",
                    "prepare": "npm install left-pad"
                }
            })
            .to_string(),
            r#"{"action":"done","message":"ok"}"#.to_string(),
        ]);
        let mut console = ScriptedConsole::new(["n", "y"]);
        let packages = FakePackages::default();

        let outcome = handle(
            &config,
            &completion,
            &mut console,
            &packages,
            Request::process("pad a string"),
        );

        assert_eq!(outcome, Outcome::Done("ok".to_string()));
        assert!(packages.installs().is_empty());
        assert!(console.saw("Skipped left-pad (npm)"));
        assert_eq!(console.prompts.len(), 2);
    }

    #[test]
    fn history_tracks_turns_and_prefers_server_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let completion = ScriptedCompletion::new([
            r#"{"action":"chat","message":"hello"}"#.to_string(),
            json!({
                "action": "chat",
                "message": "noted",
                "history": [{"role": "user", "content": "summary"}]
            })
            .to_string(),
        ]);
        let mut console = ScriptedConsole::default();
        let packages = FakePackages::default();
        let mut engine = Engine::new(&config, &completion, &mut console, &packages, Mode::Chat)
            .expect("engine")
            .with_system_info(Some("- OS: TestOS".to_string()));

        engine.handle(Request::chat("hi"));
        assert_eq!(
            engine.history(),
            &[HistoryEntry::user("hi"), HistoryEntry::assistant("hello")]
        );

        engine.handle(Request::chat("remember this"));
        assert_eq!(engine.history(), &[HistoryEntry::user("summary")]);

        let prompts = completion.prompts();
        assert!(prompts[0].contains("TestOS"));
        assert!(!prompts[1].contains("TestOS"));
        assert_eq!(completion.histories()[1].len(), 2);
    }
}
