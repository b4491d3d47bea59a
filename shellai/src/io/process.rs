//! Child processes with a wall-clock deadline and bounded captured output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Exit code reported for a child killed at its deadline (as `timeout(1)` does).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code with timeouts mapped to [`TIMEOUT_EXIT_CODE`] and signals to `1`.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            return TIMEOUT_EXIT_CODE;
        }
        self.status.code().unwrap_or(1)
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout as text, with a truncation marker appended when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        render_stream(&self.stdout, self.stdout_truncated, "stdout")
    }

    /// Stderr as text, with a truncation marker appended when bytes were dropped.
    pub fn stderr_text(&self) -> String {
        render_stream(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn render_stream(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// How long reader threads may keep draining once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
const DRAIN_POLL: Duration = Duration::from_millis(10);

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
///
/// Stdout and stderr are drained on separate threads while the child runs so a
/// chatty script cannot deadlock on a full pipe. At most `output_limit_bytes`
/// of each stream is kept; the rest is read and discarded.
///
/// On unix the child leads its own process group and a timeout kills the whole
/// group, so grandchildren holding the pipes open die with it. Output is never
/// awaited past the deadline plus [`DRAIN_GRACE`].
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning child process");
    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_group(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let readers = [&stdout_handle, &stderr_handle];
    let drain_until = if timed_out {
        Instant::now() + DRAIN_GRACE
    } else {
        deadline.max(Instant::now())
    };
    if !wait_for_readers(&readers, drain_until) && !timed_out {
        // Background jobs outlived the script and still hold its pipes.
        warn!("command left processes holding its output open, killing them");
        kill_process_group(&mut child)?;
        wait_for_readers(&readers, Instant::now() + DRAIN_GRACE);
    }

    let (stdout, stdout_truncated) = collect_output(stdout_handle, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(stderr_handle, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Poll until every reader has finished or `until` passes.
fn wait_for_readers(readers: &[&ReaderHandle], until: Instant) -> bool {
    loop {
        if readers.iter().all(|handle| handle.is_finished()) {
            return true;
        }
        if Instant::now() >= until {
            return false;
        }
        thread::sleep(DRAIN_POLL);
    }
}

/// Join a finished reader; a reader still blocked on the pipe is abandoned.
fn collect_output(handle: ReaderHandle, stream: &'static str) -> Result<(Vec<u8>, usize)> {
    if !handle.is_finished() {
        warn!(stream, "output still open after the deadline, discarding it");
        return Ok((Vec::new(), 0));
    }
    match handle.join() {
        Ok(result) => result.with_context(|| format!("read {stream}")),
        Err(_) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

/// SIGKILL the process group led by `child`.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(child: &mut Child) -> Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).context("process id out of range")?;
    // SAFETY: killpg only sends a signal; the group was created at spawn.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the whole group is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err).context("kill process group");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
