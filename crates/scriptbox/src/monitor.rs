//! Subprocess execution and output collection.
//!
//! Runs one command to completion under a deadline:
//!
//! - **Process group** - the child leads a new group, so everything it forks
//!   can be signalled at once
//! - **Reader threads** - stdout and stderr are drained while the child runs,
//!   so a chatty child never blocks on a full pipe
//! - **Supervisor loop** - waits on the child in short slices, checking the
//!   deadline and the output limit between them
//! - **Timeout** - on deadline the whole group gets `SIGKILL` and the child is
//!   reaped
//!
//! ## Output Limits
//!
//! Each stream keeps at most `max_output` bytes. A stream that goes past the
//! limit gets the group killed and the status set to `OutputLimitExceeded`.
//!
//! ## Pipe Draining
//!
//! A process that left the group (e.g. through `setsid`) can hold the pipes
//! open after the group is gone. Draining stops at the run's deadline, or a
//! short grace period after the kill, whichever is later. Readers still
//! blocked at that point are abandoned and whatever they captured is returned.

use std::io::{self, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use wait_timeout::ChildExt;

/// Longest single wait between deadline and output-limit checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time allowed for readers to finish after the group is killed.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Output from one subprocess run.
#[derive(Debug, Clone)]
pub struct Output {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: Status,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub truncated: bool,
}

impl Output {
    #[inline]
    pub fn success(&self) -> bool {
        self.status == Status::Exited && self.exit_code == Some(0)
    }

    #[inline]
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[inline]
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Exited,
    Signaled,
    Timeout,
    OutputLimitExceeded,
}

#[derive(Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Spawn `command` and wait for it, killing its process group after `timeout`.
///
/// Stdin is closed; stdout and stderr are captured.
pub fn run(mut command: Command, timeout: Duration, max_output: usize) -> io::Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let start = Instant::now();
    let deadline = start + timeout;
    let mut child = command.spawn()?;

    let overflow = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel();
    let stdout = SharedCapture::default();
    let stderr = SharedCapture::default();
    let mut readers = 0;
    if let Some(pipe) = child.stdout.take() {
        spawn_reader(pipe, Arc::clone(&stdout), max_output, Arc::clone(&overflow), done_tx.clone());
        readers += 1;
    }
    if let Some(pipe) = child.stderr.take() {
        spawn_reader(pipe, Arc::clone(&stderr), max_output, Arc::clone(&overflow), done_tx.clone());
        readers += 1;
    }
    drop(done_tx);

    let (mut status, exit_code, signal) = match supervise(&mut child, deadline, &overflow) {
        Ok(ended) => ended,
        Err(e) => {
            kill_group(&mut child);
            return Err(e);
        }
    };

    let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
    if !drain(&done_rx, readers, drain_until) {
        tracing::warn!(pid = child.id(), "output pipes still open past deadline, abandoning readers");
    }

    // The limit can be hit by output still buffered when the child exited.
    if overflow.load(Ordering::Acquire) && status != Status::Timeout {
        status = Status::OutputLimitExceeded;
    }

    let stdout = std::mem::take(&mut *lock(&stdout));
    let stderr = std::mem::take(&mut *lock(&stderr));

    Ok(Output {
        truncated: stdout.truncated || stderr.truncated,
        stdout: stdout.data,
        stderr: stderr.data,
        status,
        duration: start.elapsed(),
        exit_code,
        signal,
    })
}

/// Wait for the child in short slices until it exits, the deadline passes,
/// or a reader reports the output limit.
fn supervise(
    child: &mut Child,
    deadline: Instant,
    overflow: &AtomicBool,
) -> io::Result<(Status, Option<i32>, Option<i32>)> {
    loop {
        if overflow.load(Ordering::Acquire) {
            tracing::debug!(pid = child.id(), "output limit exceeded, killing process group");
            kill_group(child);
            return Ok((Status::OutputLimitExceeded, None, None));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::debug!(pid = child.id(), "deadline exceeded, killing process group");
            kill_group(child);
            return Ok((Status::Timeout, None, None));
        }

        if let Some(exit) = child.wait_timeout(remaining.min(POLL_INTERVAL))? {
            // Leftover group members would keep the pipes open.
            signal_group(child);
            return Ok(classify(exit));
        }
    }
}

/// Wait for `readers` completions, giving up at `until`.
fn drain(done: &Receiver<()>, readers: usize, until: Instant) -> bool {
    for _ in 0..readers {
        let remaining = until.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            return false;
        }
    }
    true
}

fn classify(exit: ExitStatus) -> (Status, Option<i32>, Option<i32>) {
    match (exit.code(), exit.signal()) {
        (Some(code), _) => (Status::Exited, Some(code), None),
        (None, sig) => (Status::Signaled, None, sig),
    }
}

/// SIGKILL the child's group, then reap the child.
fn kill_group(child: &mut Child) {
    if let Err(errno) = send_group_kill(child) {
        tracing::debug!(pid = child.id(), %errno, "killpg failed, killing child only");
        child.kill().ok();
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = child.id(), error = %e, "failed to reap killed child");
    }
}

fn signal_group(child: &Child) {
    match send_group_kill(child) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => tracing::debug!(pid = child.id(), %errno, "failed to sweep process group"),
    }
}

fn send_group_kill(child: &Child) -> Result<(), Errno> {
    // process_group(0) makes the child's pid its group id.
    let pgid = i32::try_from(child.id()).map_err(|_| Errno::ESRCH)?;
    killpg(Pid::from_raw(pgid), Signal::SIGKILL)
}

fn lock(capture: &SharedCapture) -> MutexGuard<'_, Capture> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copy `pipe` into `sink` until EOF or the limit, then report on `done`.
fn spawn_reader<R>(
    mut pipe: R,
    sink: SharedCapture,
    max: usize,
    overflow: Arc<AtomicBool>,
    done: Sender<()>,
) where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let mut capture = lock(&sink);
                    let room = max.saturating_sub(capture.data.len());
                    capture.data.extend_from_slice(&buf[..n.min(room)]);
                    if n > room {
                        capture.truncated = true;
                        overflow.store(true, Ordering::Release);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        done.send(()).ok();
    });
}
