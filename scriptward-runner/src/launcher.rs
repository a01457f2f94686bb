//! One-shot isolated process launches with bounded, merged output capture.
//!
//! [`IsolatedLauncher`] spawns the child in its own session and process
//! group with a cleared environment and the requested rlimits, reads stdout
//! and stderr into one buffer, and enforces a wall-clock deadline and an
//! output ceiling. Whatever the outcome, the whole process group is killed
//! and the direct child reaped before [`ProcessLauncher::launch`] returns.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::process_group;
use crate::rlimits::ChildLimits;

const READ_CHUNK_BYTES: usize = 8_192;
/// How long pipes may stay open after the child itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);
/// Upper bound on waiting for a killed group to disappear.
const GROUP_REAP_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to launch one child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Complete child environment; nothing is inherited.
    pub env: HashMap<String, String>,
    /// Wall-clock budget.
    pub timeout: Duration,
    pub limits: ChildLimits,
    /// Bytes of merged output kept before the run is killed.
    pub output_cap: usize,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            limits: ChildLimits::default(),
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: ChildLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn output_cap(mut self, output_cap: usize) -> Self {
        self.output_cap = output_cap;
        self
    }
}

/// Exit status of a finished child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    success: bool,
    code: Option<i32>,
    signal: Option<i32>,
}

impl CommandStatus {
    pub fn new(success: bool, code: Option<i32>, signal: Option<i32>) -> Self {
        Self {
            success,
            code,
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Terminating signal, Unix only.
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// True when the child was stopped by its CPU-time rlimit.
    pub fn cpu_limit_exceeded(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal == Some(libc::SIGXCPU)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<ExitStatus> for CommandStatus {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            success: status.success(),
            code: status.code(),
            signal,
        }
    }
}

/// Result of one launch. The child and its process group are gone by the
/// time this value exists.
#[derive(Debug, Clone)]
pub struct CapturedRun {
    /// Interleaved stdout and stderr, at most `output_cap` bytes.
    pub output: Vec<u8>,
    pub status: CommandStatus,
    /// The wall-clock budget ran out and the group was killed.
    pub timed_out: bool,
    /// The output ceiling was hit and the group was killed.
    pub output_limit_exceeded: bool,
    pub elapsed: Duration,
    pub pid: u32,
}

impl CapturedRun {
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no program given to launch")]
    MissingProgram,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("spawned child reported no pid")]
    MissingPid,
    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),
}

/// Strategy for running one child to completion.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<CapturedRun, LaunchError>;
}

/// Launches real OS processes, each in its own process group.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolatedLauncher;

impl IsolatedLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for IsolatedLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<CapturedRun, LaunchError> {
        if spec.program.as_os_str().is_empty() {
            return Err(LaunchError::MissingProgram);
        }

        let started = Instant::now();
        let mut command = build_command(spec);
        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;
        let pid = child.id().ok_or(LaunchError::MissingPid)?;
        let mut guard = GroupGuard::new(pid);
        debug!(pid, program = %spec.program.display(), "spawned sandboxed child");

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(64);
        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|stdout| spawn_reader(stdout, output_tx.clone())),
            child
                .stderr
                .take()
                .map(|stderr| spawn_reader(stderr, output_tx.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();
        drop(output_tx);

        let collected = collect_until_exit(&mut child, output_rx, spec.timeout, spec.output_cap).await;
        let exited = collected.as_ref().ok().and_then(|collected| collected.status);
        let reaped = terminate_and_reap(&mut child, pid, exited).await;
        guard.disarm();
        for reader in readers {
            reader.abort();
        }

        let collected = collected?;
        let status = CommandStatus::from(reaped?);
        let elapsed = started.elapsed();
        debug!(
            pid,
            elapsed_ms = elapsed.as_millis(),
            stop = ?collected.stop,
            code = ?status.code(),
            "sandboxed child finished"
        );

        Ok(CapturedRun {
            output: collected.output,
            status,
            timed_out: collected.stop == Stop::TimedOut,
            output_limit_exceeded: collected.stop == Stop::OutputLimit,
            elapsed,
            pid,
        })
    }
}

fn build_command(spec: &LaunchSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    install_pre_exec(&mut command, spec.limits);

    command
}

#[cfg(unix)]
fn install_pre_exec(command: &mut Command, limits: ChildLimits) {
    #[cfg(target_os = "linux")]
    let parent_pid = unsafe { libc::getpid() };

    // The hook only issues async-signal-safe syscalls.
    unsafe {
        command.pre_exec(move || {
            process_group::detach_from_tty()?;
            #[cfg(target_os = "linux")]
            process_group::set_parent_death_signal(parent_pid)?;
            crate::rlimits::apply(limits)?;
            Ok(())
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exited,
    TimedOut,
    OutputLimit,
}

struct Collected {
    output: Vec<u8>,
    status: Option<ExitStatus>,
    stop: Stop,
}

async fn collect_until_exit(
    child: &mut Child,
    mut output_rx: mpsc::Receiver<Vec<u8>>,
    timeout: Duration,
    output_cap: usize,
) -> Result<Collected, LaunchError> {
    let deadline = Instant::now() + timeout;
    let mut drain_until = deadline;
    let mut output = Vec::new();
    let mut status: Option<ExitStatus> = None;
    let mut streams_open = true;

    loop {
        if status.is_some() && !streams_open {
            return Ok(Collected {
                output,
                status,
                stop: Stop::Exited,
            });
        }

        tokio::select! {
            chunk = output_rx.recv(), if streams_open => match chunk {
                Some(bytes) => {
                    let room = output_cap.saturating_sub(output.len());
                    if bytes.len() > room {
                        output.extend(bytes.into_iter().take(room));
                        return Ok(Collected { output, status, stop: Stop::OutputLimit });
                    }
                    output.extend_from_slice(&bytes);
                }
                None => streams_open = false,
            },
            result = child.wait(), if status.is_none() => {
                status = Some(result.map_err(LaunchError::Wait)?);
                drain_until = (Instant::now() + DRAIN_GRACE).min(deadline);
            }
            () = tokio::time::sleep_until(drain_until), if status.is_some() => {
                // Exited, but a descendant still holds the pipes open.
                return Ok(Collected { output, status, stop: Stop::Exited });
            }
            () = tokio::time::sleep_until(deadline), if status.is_none() => {
                return Ok(Collected { output, status, stop: Stop::TimedOut });
            }
        }
    }
}

/// Kill the whole group, reap the direct child and wait for the group to
/// vanish. Runs on every path out of a launch.
async fn terminate_and_reap(
    child: &mut Child,
    pgid: u32,
    exited: Option<ExitStatus>,
) -> Result<ExitStatus, LaunchError> {
    if let Err(error) = process_group::kill_process_group(pgid) {
        warn!(pgid, %error, "failed to kill sandbox process group");
    }
    #[cfg(not(unix))]
    if exited.is_none()
        && let Err(error) = child.start_kill()
    {
        warn!(pgid, %error, "failed to kill sandboxed child");
    }

    let status = match exited {
        Some(status) => status,
        None => child.wait().await.map_err(LaunchError::Wait)?,
    };

    if !process_group::wait_for_group_exit(pgid, GROUP_REAP_TIMEOUT).await {
        warn!(pgid, "sandbox process group still present after SIGKILL");
    }
    Ok(status)
}

fn spawn_reader<R>(reader: R, output_tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_output_stream(reader, output_tx))
}

async fn read_output_stream<R>(mut reader: R, output_tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                if output_tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(%error, "sandbox output stream closed with an error");
                break;
            }
        }
    }
}

/// Kills the process group if a launch is abandoned midway (task
/// cancellation or panic).
struct GroupGuard {
    pgid: u32,
    armed: bool,
}

impl GroupGuard {
    fn new(pgid: u32) -> Self {
        Self { pgid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(error) = process_group::kill_process_group(self.pgid)
        {
            warn!(pgid = self.pgid, %error, "failed to kill abandoned sandbox process group");
        }
    }
}
