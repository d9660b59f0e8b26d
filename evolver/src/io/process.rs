//! Child processes with wall-clock timeouts and bounded output capture.
//!
//! Both external collaborators (the model CLI and the evaluator script) run
//! as child processes that may hang or flood their pipes. Output is drained
//! on dedicated threads while the parent waits with a deadline, so a
//! misbehaving child can neither deadlock the loop nor exhaust memory.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Capture limits for one child invocation.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSpec {
    pub timeout: Duration,
    /// Bytes of stdout/stderr retained in memory; the rest is drained and
    /// discarded.
    pub limit_bytes: usize,
}

/// Captured child output.
#[derive(Debug)]
pub struct ChildCapture {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl ChildCapture {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Last `max_chars` characters of stderr, for diagnostics.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = self.stderr_lossy();
        let chars: Vec<char> = text.chars().collect();
        let start = chars.len().saturating_sub(max_chars);
        chars[start..].iter().collect()
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait up to the capture deadline.
///
/// On timeout the child is killed and `timed_out` is set; the partial output
/// drained so far is still returned. `Err` means the child could not be
/// spawned or its pipes could not be serviced.
#[instrument(skip_all, fields(timeout_secs = spec.timeout.as_secs(), limit_bytes = spec.limit_bytes))]
pub fn run_captured(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    spec: CaptureSpec,
) -> Result<ChildCapture> {
    use wait_timeout::ChildExt;

    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = spec.limit_bytes;
    let stdout_handle = thread::spawn(move || drain_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || drain_limited(stderr, limit));

    let mut timed_out = false;
    let status = match child.wait_timeout(spec.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = spec.timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_drain(stdout_handle).context("join stdout")?;
    let (stderr, stderr_dropped) = join_drain(stderr_handle).context("join stderr")?;

    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ChildCapture {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

fn join_drain(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            dropped += n - keep;
        } else {
            dropped += n;
        }
    }

    Ok((buf, dropped))
}
