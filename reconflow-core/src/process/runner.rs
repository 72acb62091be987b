//! Spawning external tools with bounded output capture and two-phase
//! termination of their process group.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::log::{LineRing, LogSink};
use crate::error::LaunchError;

/// Where a process's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdoutSink {
    /// Into the scan log, prefixed with the invocation label.
    Log,
    /// Raw into an artifact file.
    Artifact { path: PathBuf, append: bool },
}

/// One external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Prefix for log lines and the name hooks see.
    pub label: String,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Working directory, inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// File piped to stdin, if any.
    pub stdin: Option<PathBuf>,
    /// Where stdout goes.
    pub stdout: StdoutSink,
}

impl Invocation {
    /// Runs `argv` with stdout sent to the scan log.
    pub fn new<I, S>(label: impl Into<String>, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
            stdout: StdoutSink::Log,
        }
    }

    /// Runs the process in `dir`.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feeds the contents of `path` on stdin.
    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Truncates `path` and writes stdout into it.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = StdoutSink::Artifact {
            path: path.into(),
            append: false,
        };
        self
    }

    /// Appends stdout to `path`. Used when several invocations share one artifact.
    pub fn stdout_append(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = StdoutSink::Artifact {
            path: path.into(),
            append: true,
        };
        self
    }

    /// First argv entry.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Space-joined argv, for logging only.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Last bytes of stdout that went to the log.
    pub stdout_tail: String,
    /// Last bytes of stderr.
    pub stderr_tail: String,
    /// Wall time from spawn to exit.
    pub duration: Duration,
    /// The run was stopped by cancellation.
    pub cancelled: bool,
    /// Cancellation had to escalate to SIGKILL.
    pub forced_kill: bool,
}

impl ProcessOutcome {
    /// Exit code zero and not cancelled.
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }
}

/// Lets the owner of a scan track which processes are alive.
#[async_trait]
pub trait ProcessHooks: Send + Sync {
    /// Called once the child is running. `pid` is also its process group.
    async fn process_spawned(&self, label: &str, pid: u32);
    /// Called after the child and its pipes are done.
    async fn process_exited(&self, label: &str);
}

/// Hooks that ignore everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl ProcessHooks for NoopHooks {
    async fn process_spawned(&self, _label: &str, _pid: u32) {}
    async fn process_exited(&self, _label: &str) {}
}

/// Runs external commands with two-phase cancellation.
#[derive(Clone)]
pub struct ProcessRunner {
    grace: Duration,
    tail_lines: usize,
    tail_bytes: usize,
}

impl fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("grace_ms", &self.grace.as_millis())
            .field("tail_lines", &self.tail_lines)
            .field("tail_bytes", &self.tail_bytes)
            .finish()
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 8 * 1024)
    }
}

type Tail = Arc<Mutex<LineRing>>;

impl ProcessRunner {
    /// `grace` is the wait between SIGTERM and SIGKILL on cancellation.
    pub fn new(grace: Duration, tail_bytes: usize) -> Self {
        Self {
            grace,
            tail_lines: 200,
            tail_bytes,
        }
    }

    /// Wait between SIGTERM and SIGKILL.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Runs `invocation` to completion or until `cancel` fires.
    ///
    /// On cancellation the whole process group receives SIGTERM, then
    /// SIGKILL once the grace period runs out.
    pub async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
        log: Arc<dyn LogSink>,
        hooks: &dyn ProcessHooks,
    ) -> Result<ProcessOutcome, LaunchError> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or(LaunchError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(LaunchError::EmptyCommand);
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        match &invocation.stdin {
            Some(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|source| {
                    LaunchError::Stdin {
                        path: path.clone(),
                        source,
                    }
                })?;
                command.stdin(file.into_std().await);
            }
            None => {
                command.stdin(Stdio::null());
            }
        }
        #[cfg(unix)]
        command.process_group(0);

        let stdout_file = match &invocation.stdout {
            StdoutSink::Log => None,
            StdoutSink::Artifact { path, append } => Some(
                open_output(path, *append)
                    .await
                    .map_err(|source| LaunchError::Spawn {
                        program: program.clone(),
                        source,
                    })?,
            ),
        };

        log.append(&format!("[{}] $ {}", invocation.label, invocation.command_line()))
            .await;

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|source| LaunchError::from_spawn(program, source))?;
        let pid = child.id();
        if let Some(pid) = pid {
            hooks.process_spawned(&invocation.label, pid).await;
        }
        debug!(
            target: "scan::process",
            label = %invocation.label,
            pid = ?pid,
            "process spawned"
        );

        let label: Arc<str> = Arc::from(invocation.label.as_str());
        let stdout_tail: Tail =
            Arc::new(Mutex::new(LineRing::new(self.tail_lines, self.tail_bytes)));
        let stderr_tail: Tail =
            Arc::new(Mutex::new(LineRing::new(self.tail_lines, self.tail_bytes)));

        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stdout,
                label.clone(),
                stdout_file,
                log.clone(),
                stdout_tail.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stderr,
                label.clone(),
                None,
                log.clone(),
                stderr_tail.clone(),
            )));
        }

        let (status, cancelled, forced_kill) = tokio::select! {
            biased;
            status = child.wait() => (status, false, false),
            _ = cancel.cancelled() => {
                let (status, forced) = self.terminate(&mut child, pid, &invocation.label).await;
                (status, true, forced)
            }
        };

        for mut reader in readers {
            if tokio::time::timeout(self.grace, &mut reader).await.is_err() {
                // A surviving grandchild still holds the pipe open.
                reader.abort();
            }
        }
        hooks.process_exited(&invocation.label).await;

        let duration = started.elapsed();
        let exit_code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(
                    target: "scan::process",
                    label = %invocation.label,
                    error = %err,
                    "failed to collect exit status"
                );
                None
            }
        };

        log.append(&format!(
            "[{}] exit={} duration={}ms{}",
            invocation.label,
            exit_code.map_or_else(|| "signal".to_string(), |code| code.to_string()),
            duration.as_millis(),
            if cancelled { " (cancelled)" } else { "" }
        ))
        .await;
        info!(
            target: "scan::process",
            label = %invocation.label,
            exit_code = ?exit_code,
            cancelled,
            forced_kill,
            duration_ms = duration.as_millis() as u64,
            "process finished"
        );

        let stdout_tail = stdout_tail.lock().await.joined();
        let stderr_tail = stderr_tail.lock().await.joined();
        Ok(ProcessOutcome {
            exit_code,
            stdout_tail,
            stderr_tail,
            duration,
            cancelled,
            forced_kill,
        })
    }

    async fn terminate(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        label: &str,
    ) -> (io::Result<ExitStatus>, bool) {
        if !send_terminate(pid) {
            let _ = child.start_kill();
        }

        let result = match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(status) => (status, false),
            Err(_) => {
                warn!(
                    target: "scan::process",
                    label,
                    pid = ?pid,
                    grace_ms = self.grace.as_millis() as u64,
                    "process ignored termination request, killing"
                );
                send_kill(pid);
                let _ = child.start_kill();
                (child.wait().await, true)
            }
        };

        // Sweep anything the tool left behind in its group.
        send_kill(pid);
        result
    }
}

async fn open_output(path: &Path, append: bool) -> io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await
}

async fn pump<R>(
    reader: R,
    label: Arc<str>,
    file: Option<tokio::fs::File>,
    log: Arc<dyn LogSink>,
    tail: Tail,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut file = file.map(BufWriter::new);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        let write_error = match file.as_mut() {
            Some(out) => out.write_all(&buf).await.err(),
            None => {
                log.append(&format!("[{label}] {line}")).await;
                None
            }
        };
        if let Some(err) = write_error {
            warn!(target: "scan::process", label = %label, error = %err, "artifact write failed");
            file = None;
        }
        tail.lock().await.push(line);
    }

    if let Some(mut out) = file
        && let Err(err) = out.flush().await
    {
        warn!(target: "scan::process", label = %label, error = %err, "artifact flush failed");
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    killpg(Pid::from_raw(raw), signal).is_ok()
}

#[cfg(unix)]
fn send_terminate(pid: Option<u32>) -> bool {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn send_kill(pid: Option<u32>) {
    let _ = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn send_terminate(_pid: Option<u32>) -> bool {
    false
}

#[cfg(not(unix))]
fn send_kill(_pid: Option<u32>) {}
