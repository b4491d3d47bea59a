//! Operator console and the yes/no confirmation gate.
//!
//! [`Console`] is the single reader of operator input. The interactive session
//! reads through it, and so does the [`ConfirmationGate`], which pauses the
//! ambient stream for the duration of one question so prompts never interleave.

use std::io::{self, BufRead, StdinLock, Stdout, Write};

use anyhow::{Context, Result, bail};
use tracing::warn;

/// Kind of operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Success,
    Error,
    Working,
    /// Model prose, printed without a tag.
    Reply,
}

impl Notice {
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Notice::Info => Some("[INFO]"),
            Notice::Success => Some("[SUCCESS]"),
            Notice::Error => Some("[ERROR]"),
            Notice::Working => Some("[WORKING]"),
            Notice::Reply => None,
        }
    }
}

/// Cooperative operator input/output.
pub trait Console {
    /// Ambient read for the session loop. Refused while paused.
    ///
    /// Returns `Ok(None)` at end of input.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    /// Read one answer on behalf of whoever paused the ambient stream.
    fn read_answer(&mut self, prompt: &str) -> Result<Option<String>>;

    fn pause(&mut self);

    fn resume(&mut self);

    fn is_paused(&self) -> bool;

    fn notify(&mut self, notice: Notice, message: &str);
}

/// Yes/no questions to the operator.
pub trait Confirmer {
    /// `false` unless the operator explicitly agreed.
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Line-oriented console over any reader/writer pair.
pub struct TerminalConsole<R, W> {
    input: R,
    output: W,
    paused: bool,
}

impl TerminalConsole<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalConsole<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            paused: false,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn prompt_and_read(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}").context("write prompt")?;
        self.output.flush().context("flush prompt")?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read operator input")?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

impl<R: BufRead, W: Write> Console for TerminalConsole<R, W> {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        if self.paused {
            bail!("input stream is paused");
        }
        self.prompt_and_read(prompt)
    }

    fn read_answer(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompt_and_read(prompt)
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
        let written = match notice.tag() {
            Some(tag) => writeln!(self.output, "{tag} {message}"),
            None => writeln!(self.output, "{message}"),
        };
        if let Err(err) = written.and_then(|()| self.output.flush()) {
            warn!(err = %err, "failed to write notice");
        }
    }
}

/// [`Confirmer`] backed by a [`Console`].
pub struct ConfirmationGate<'a, C: Console + ?Sized> {
    console: &'a mut C,
}

impl<'a, C: Console + ?Sized> ConfirmationGate<'a, C> {
    pub fn new(console: &'a mut C) -> Self {
        Self { console }
    }
}

impl<C: Console + ?Sized> Confirmer for ConfirmationGate<'_, C> {
    fn confirm(&mut self, prompt: &str) -> bool {
        let was_paused = self.console.is_paused();
        self.console.pause();
        let answer = self.console.read_answer(&format!("{prompt} (y/n): "));
        if !was_paused {
            self.console.resume();
        }
        match answer {
            Ok(Some(line)) => is_affirmative(&line),
            Ok(None) => false,
            Err(err) => {
                warn!(err = %err, "confirmation read failed, treating as no");
                false
            }
        }
    }
}

/// `y`, `yes`, `Y`... anything whose first non-blank character is `y`.
pub fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&'y'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn console(input: &str) -> TerminalConsole<Cursor<Vec<u8>>, Vec<u8>> {
        TerminalConsole::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn affirmative_answers() {
        for yes in ["y", "Y", "yes", " YES", "yep"] {
            assert!(is_affirmative(yes), "{yes}");
        }
        for no in ["", "n", "no", "sure", " "] {
            assert!(!is_affirmative(no), "{no}");
        }
    }

    #[test]
    fn gate_reads_one_line_and_resumes() {
        let mut console = console("yes\nnext\n");
        assert!(ConfirmationGate::new(&mut console).confirm("Run it?"));
        assert!(!console.is_paused());
        assert_eq!(
            console.read_line("> ").expect("read"),
            Some("next".to_string())
        );
        let output = String::from_utf8(console.into_output()).expect("utf8");
        assert_eq!(output, "Run it? (y/n): > ");
    }

    #[test]
    fn gate_defaults_to_no_at_end_of_input() {
        let mut console = console("");
        assert!(!ConfirmationGate::new(&mut console).confirm("Install jq?"));
    }

    #[test]
    fn ambient_reads_are_refused_while_paused() {
        let mut console = console("hello\n");
        console.pause();
        assert!(console.read_line("> ").is_err());
        console.resume();
        assert_eq!(
            console.read_line("> ").expect("read"),
            Some("hello".to_string())
        );
    }

    #[test]
    fn notices_are_tagged() {
        let mut console = console("");
        console.notify(Notice::Working, "Installing jq");
        console.notify(Notice::Reply, "Hello");
        let output = String::from_utf8(console.into_output()).expect("utf8");
        assert_eq!(output, "[WORKING] Installing jq\nHello\n");
    }
}
