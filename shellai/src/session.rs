//! Interactive chat and dev sessions.
//!
//! A session owns one [`Engine`] for its lifetime, so history and the one-off
//! system info carry across turns. History is saved after every turn.

use anyhow::Result;
use tracing::{info, warn};

use crate::engine::{Engine, Request};
use crate::io::completion::Completion;
use crate::io::config::AgentConfig;
use crate::io::console::{Console, Notice};
use crate::io::history::HistoryStore;
use crate::io::packages::PackageManager;
use crate::io::prompt::Mode;

const HELP: &str = "Type a request and press enter. Commands: help, clear (forget history), exit.";

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Blank,
    Exit,
    Clear,
    Help,
    Ask(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => Line::Blank,
        "exit" | "quit" => Line::Exit,
        "clear" => Line::Clear,
        "help" => Line::Help,
        _ => Line::Ask(trimmed),
    }
}

fn prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Chat => "> ",
        Mode::Dev => "dev> ",
    }
}

/// Read-eval loop until `exit` or end of input.
pub fn run_session<C, K, P>(
    config: &AgentConfig,
    completion: &C,
    console: &mut K,
    packages: &P,
    mode: Mode,
    store: &HistoryStore,
    system_info: Option<String>,
) -> Result<()>
where
    C: Completion + ?Sized,
    K: Console + ?Sized,
    P: PackageManager + ?Sized,
{
    let history = store.load();
    info!(mode = %mode, turns = history.len(), "session started");
    let mut engine = Engine::new(config, completion, console, packages, mode)?
        .with_history(history)
        .with_system_info(system_info);
    engine.console().notify(
        Notice::Info,
        &format!("ShellAI {mode} mode. Type `help` for commands, `exit` to quit."),
    );

    while let Some(line) = engine.console().read_line(prompt(mode))? {
        match classify(&line) {
            Line::Blank => {}
            Line::Exit => break,
            Line::Help => engine.console().notify(Notice::Info, HELP),
            Line::Clear => {
                engine.clear_history();
                match store.clear() {
                    Ok(()) => engine.console().notify(Notice::Success, "History cleared."),
                    Err(err) => engine
                        .console()
                        .notify(Notice::Error, &format!("Could not clear history: {err:#}")),
                }
            }
            Line::Ask(question) => {
                let request = match mode {
                    Mode::Chat => Request::chat(question),
                    Mode::Dev => Request::process(question),
                };
                engine.handle(request);
                if let Err(err) = store.save(engine.history()) {
                    warn!(err = %err, "failed to save history");
                }
            }
        }
    }
    engine.console().notify(Notice::Info, "Goodbye.");
    Ok(())
}
