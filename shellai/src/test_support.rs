//! Test doubles for the engine's collaborators.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

use anyhow::{Result, anyhow, bail};

use crate::core::action::HistoryEntry;
use crate::core::packages::Package;
use crate::io::completion::Completion;
use crate::io::config::AgentConfig;
use crate::io::console::{Console, Notice};
use crate::io::packages::PackageManager;

/// Config with every directory under `root`, no host probing and short timeouts.
pub fn config_in(root: &Path) -> AgentConfig {
    AgentConfig {
        sandbox_dir: root.join("shell"),
        output_dir: root.join("out"),
        history_dir: Some(root.join("history")),
        send_system_info: false,
        script_timeout_secs: 10,
        ..AgentConfig::default()
    }
}

/// Completion that replays queued replies and records every call.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: RefCell<VecDeque<Result<String, String>>>,
    /// Returned once the queue is empty.
    fallback: Option<String>,
    prompts: RefCell<Vec<String>>,
    histories: RefCell<Vec<Vec<HistoryEntry>>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Answers every call with `reply`.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    /// Queue a transport failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.replies.borrow_mut().push_back(Err(message.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    /// History passed with each call.
    pub fn histories(&self) -> Vec<Vec<HistoryEntry>> {
        self.histories.borrow().clone()
    }
}

impl Completion for ScriptedCompletion {
    fn complete(&self, prompt: &str, history: &[HistoryEntry]) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.histories.borrow_mut().push(history.to_vec());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("no scripted reply left")),
        }
    }
}

/// Console fed from a fixed list of operator lines.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    lines: VecDeque<String>,
    paused: bool,
    pub prompts: Vec<String>,
    pub notices: Vec<(Notice, String)>,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn messages(&self, notice: Notice) -> Vec<&str> {
        self.notices
            .iter()
            .filter(|(kind, _)| *kind == notice)
            .map(|(_, message)| message.as_str())
            .collect()
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.notices.iter().any(|(_, message)| message.contains(needle))
    }

    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl Console for ScriptedConsole {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        if self.paused {
            bail!("input stream is paused");
        }
        self.read_answer(prompt)
    }

    fn read_answer(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompts.push(prompt.to_string());
        Ok(self.lines.pop_front())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn notify(&mut self, notice: Notice, message: &str) {
        self.notices.push((notice, message.to_string()));
    }
}

/// Package manager over an in-memory installed set.
#[derive(Debug, Default)]
pub struct FakePackages {
    installed: RefCell<HashSet<String>>,
    broken: HashSet<String>,
    installs: RefCell<Vec<String>>,
}

impl FakePackages {
    pub fn with_installed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            installed: RefCell::new(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Installing `name` fails.
    pub fn broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.borrow().clone()
    }
}

impl PackageManager for FakePackages {
    fn is_installed(&self, package: &Package) -> bool {
        self.installed.borrow().contains(&package.name)
    }

    fn install(&self, package: &Package) -> Result<()> {
        self.installs.borrow_mut().push(package.name.clone());
        if self.broken.contains(&package.name) {
            bail!("{} is not available", package.name);
        }
        self.installed.borrow_mut().insert(package.name.clone());
        Ok(())
    }
}
