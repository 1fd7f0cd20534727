//! Agent subprocess launcher.
//!
//! Builds the SDK-mode argv, spawns the CLI with stderr captured into a
//! bounded buffer, and exposes PID / exit / kill primitives. The CLI
//! auto-enables `--print`, `--input-format=stream-json`,
//! `--output-format=stream-json`, and `--verbose` under `--sdk-url`, so none
//! of those flags are passed here.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::SpawnError;

/// Grace window between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Captured-stderr cap: the first 4 KiB are kept, the rest discarded.
const STDERR_CAP: usize = 4096;

/// Environment variable carrying the access token into the agent process.
pub const ACCESS_TOKEN_ENV: &str = "AGENT_ACCESS_TOKEN";

/// Everything needed to launch one agent subprocess.
#[derive(Clone, Debug, Default)]
pub struct SpawnOptions {
    /// Path (or PATH-resolved name) of the agent CLI binary.
    pub cli_path: String,
    /// Bridge endpoint the agent connects back to (`ws://localhost:<port>`).
    pub sdk_url: String,
    /// Working directory for the subprocess (the project folder).
    pub working_dir: Option<String>,
    /// `--model` value.
    pub model: Option<String>,
    /// `--permission-mode` value.
    pub permission_mode: Option<String>,
    /// `--resume` value.
    pub resume_session_id: Option<String>,
    /// Pass `--fork-session`.
    pub fork_session: bool,
    /// `--system-prompt` value.
    pub system_prompt: Option<String>,
    /// `--append-system-prompt` value.
    pub append_system_prompt: Option<String>,
    /// Token exported as [`ACCESS_TOKEN_ENV`] when non-empty.
    pub access_token: Option<String>,
}

/// Build the agent CLI argv. Optional flags are appended only when non-empty.
pub fn build_argv(opts: &SpawnOptions) -> Vec<String> {
    fn push_flag(argv: &mut Vec<String>, flag: &str, value: Option<&String>) {
        if let Some(v) = value {
            if !v.is_empty() {
                argv.push(flag.to_string());
                argv.push(v.clone());
            }
        }
    }

    let mut argv = vec!["--sdk-url".to_string(), opts.sdk_url.clone()];
    push_flag(&mut argv, "--model", opts.model.as_ref());
    push_flag(&mut argv, "--permission-mode", opts.permission_mode.as_ref());
    push_flag(&mut argv, "--resume", opts.resume_session_id.as_ref());
    if opts.fork_session {
        argv.push("--fork-session".to_string());
    }
    push_flag(&mut argv, "--system-prompt", opts.system_prompt.as_ref());
    push_flag(&mut argv, "--append-system-prompt", opts.append_system_prompt.as_ref());
    argv
}

/// First-bytes-kept bounded stderr capture.
#[derive(Debug, Default)]
struct StderrBuffer {
    data: Vec<u8>,
    discarded: bool,
}

impl StderrBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        let remaining = STDERR_CAP.saturating_sub(self.data.len());
        if remaining == 0 {
            self.discarded = true;
            return;
        }
        let take = remaining.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            self.discarded = true;
        }
    }

    fn snapshot(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.discarded {
            text.push_str("\n[stderr truncated]");
        }
        text
    }
}

/// A spawned agent subprocess.
///
/// The child itself is owned by a background reaper task; this handle keeps
/// the PID (for signaling), the stderr capture, and an exit watch.
pub struct AgentProcess {
    pid: u32,
    stderr: Arc<Mutex<StderrBuffer>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl AgentProcess {
    /// Spawn the agent CLI.
    ///
    /// Fails synchronously with a typed error when `exec` fails or no PID is
    /// produced. Must be called from within a tokio runtime (the stderr
    /// drain and reaper run as background tasks).
    pub fn spawn(opts: &SpawnOptions) -> Result<Self, SpawnError> {
        let mut cmd = tokio::process::Command::new(&opts.cli_path);
        let _ = cmd
            .args(build_argv(opts))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = opts.working_dir.as_ref().filter(|d| !d.is_empty()) {
            let _ = cmd.current_dir(dir);
        }
        if let Some(token) = opts.access_token.as_ref().filter(|t| !t.is_empty()) {
            let _ = cmd.env(ACCESS_TOKEN_ENV, token);
        }

        debug!(cli_path = %opts.cli_path, sdk_url = %opts.sdk_url, "spawning agent subprocess");
        let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
            cli_path: opts.cli_path.clone(),
            source,
        })?;
        let pid = child.id().ok_or(SpawnError::NoPid)?;

        let stderr = Arc::new(Mutex::new(StderrBuffer::default()));
        if let Some(mut pipe) = child.stderr.take() {
            let buffer = Arc::clone(&stderr);
            let _ = tokio::spawn(async move {
                let mut chunk = [0u8; 1024];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend(&chunk[..n]),
                    }
                }
            });
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let _ = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(error) => {
                    warn!(pid, %error, "failed to wait on agent subprocess");
                    -1
                }
            };
            debug!(pid, code, "agent subprocess exited");
            let _ = exit_tx.send(Some(code));
        });

        Ok(Self { pid, stderr, exit_rx })
    }

    /// Subprocess PID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the subprocess has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Watch that resolves to `Some(exit_code)` when the subprocess exits.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    /// Suspend until the subprocess exits; returns the exit code.
    pub async fn wait_exit(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(-1),
            // Sender dropped without an exit — treat as already gone.
            Err(_) => -1,
        }
    }

    /// Captured stderr (first 4 KiB).
    pub fn stderr_snapshot(&self) -> String {
        self.stderr.lock().snapshot()
    }

    /// Graceful termination: SIGTERM, then SIGKILL if still alive after the
    /// 5-second grace window. Signal failures are swallowed — the process
    /// may already be gone.
    pub async fn kill(&self) {
        if self.has_exited() {
            return;
        }
        let _ = signal_pid(self.pid, TerminateSignal::Term);
        let mut rx = self.exit_rx.clone();
        if tokio::time::timeout(KILL_GRACE, rx.wait_for(Option::is_some))
            .await
            .is_err()
        {
            warn!(pid = self.pid, "agent ignored SIGTERM, escalating to SIGKILL");
            let _ = signal_pid(self.pid, TerminateSignal::Kill);
        }
    }
}

/// Which termination signal to deliver.
#[derive(Clone, Copy, Debug)]
pub enum TerminateSignal {
    /// Catchable graceful termination.
    Term,
    /// Uncatchable termination.
    Kill,
}

/// Send a termination signal to an arbitrary PID.
///
/// Returns `true` if the signal was delivered, `false` for "no such
/// process" (swallowed — orphan cleanup relies on this) or other delivery
/// failures (logged).
pub fn signal_pid(pid: u32, signal: TerminateSignal) -> bool {
    let Some(target) = rustix::process::Pid::from_raw(pid as i32) else {
        return false;
    };
    let sig = match signal {
        TerminateSignal::Term => rustix::process::Signal::TERM,
        TerminateSignal::Kill => rustix::process::Signal::KILL,
    };
    match rustix::process::kill_process(target, sig) {
        Ok(()) => true,
        Err(rustix::io::Errno::SRCH) => {
            debug!(pid, "no such process to signal");
            false
        }
        Err(errno) => {
            warn!(pid, %errno, "failed to signal process");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
