//! Script materialization, execution and cleanup under the sandbox root.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{Interpreter, ScriptDescriptor};
use crate::core::validate::{SandboxViolation, check_contained};
use crate::io::process::run_command_with_timeout;

/// Captured result of running one script.
///
/// A non-zero exit or a timeout is data for the analyze step, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Directory all generated scripts are confined to.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `filename` under the root, rejecting anything that escapes it.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, SandboxViolation> {
        resolve_under(&self.root, filename)
    }

    /// Write `script` under the root, ready to execute.
    ///
    /// The executable bit is set only for scripts invoked directly.
    #[instrument(skip_all, fields(filename = %script.filename))]
    pub fn materialize(&self, script: &ScriptDescriptor) -> Result<PathBuf> {
        let path = self.resolve(&script.filename)?;
        write_content(&path, &script.content)?;
        if script.interpreter.requires_direct_invocation() {
            make_executable(&path)?;
        }
        debug!(path = %path.display(), "materialized script");
        Ok(path)
    }

    /// Write a static file for a `create` action under `dir`. No executable bit.
    #[instrument(skip_all, fields(filename = %script.filename))]
    pub fn write_static(script: &ScriptDescriptor, dir: &Path) -> Result<PathBuf> {
        let path = resolve_under(dir, &script.filename)?;
        if path.exists() {
            info!(path = %path.display(), "overwriting existing file");
        }
        write_content(&path, &script.content)?;
        Ok(path)
    }
}

fn resolve_under(root: &Path, filename: &str) -> Result<PathBuf, SandboxViolation> {
    check_contained(filename)?;
    Ok(root.join(filename.replace('\\', "/")))
}

fn write_content(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, normalize_escapes(content).as_bytes())
        .with_context(|| format!("write {}", path.display()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod 755 {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Undo double-escaping: a single-line content that carries literal `\n`
/// sequences gets its `\n`, `\t`, `\r`, `\"` and `\\` turned into real characters.
///
/// Content that already has a real newline is written verbatim.
pub fn normalize_escapes(content: &str) -> Cow<'_, str> {
    if content.contains('\n') || !content.contains("\\n") {
        return Cow::Borrowed(content);
    }
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

/// Run a materialized script with its interpreter.
///
/// A process that cannot even start (missing interpreter, bad permissions) is
/// reported as exit code 1 with the error text on stderr.
#[instrument(skip_all, fields(path = %path.display(), interpreter = interpreter.type_tag()))]
pub fn execute(
    path: &Path,
    interpreter: Interpreter,
    args: &[String],
    timeout: Duration,
    output_limit_bytes: usize,
) -> ExecutionResult {
    let mut cmd = match interpreter.program() {
        Some(program) => {
            let mut cmd = Command::new(program);
            cmd.arg(path);
            cmd
        }
        None => Command::new(direct_path(path)),
    };
    cmd.args(args);

    match run_command_with_timeout(cmd, timeout, output_limit_bytes) {
        Ok(output) => {
            let result = ExecutionResult {
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                exit_code: output.exit_code(),
                timed_out: output.timed_out,
            };
            info!(exit_code = result.exit_code, timed_out = result.timed_out, "script finished");
            result
        }
        Err(err) => {
            warn!(err = %err, "script failed to start");
            ExecutionResult {
                stdout: String::new(),
                stderr: format!("{err:#}"),
                exit_code: 1,
                timed_out: false,
            }
        }
    }
}

/// A bare relative filename would be looked up on `PATH`; anchor it.
fn direct_path(path: &Path) -> PathBuf {
    if path.is_absolute() || path.components().count() > 1 {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    }
}

/// Best-effort delete. A missing file is a no-op; other failures are logged.
pub fn cleanup(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed script"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), err = %err, "failed to remove script"),
    }
}
