//! Assistant subprocess lifecycle.
//!
//! Every session gets its own `claude` process, started as the leader of a
//! fresh process group so the whole tree (tool subprocesses, MCP servers) can
//! be signalled at once. The [`ProcessRegistry`] maps request ids to pids so
//! the HTTP layer can kill a session when its client goes away.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use super::error::BridgeError;

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// How to launch the assistant.
#[derive(Debug, Clone)]
pub struct ClaudeCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl ClaudeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    /// The Claude CLI in streaming, unattended mode reading the prompt from stdin.
    pub fn claude(program: impl Into<String>, working_dir: impl Into<PathBuf>, max_turns: u32) -> Self {
        Self::new(program, Self::build_args(max_turns), working_dir)
    }

    pub fn build_args(max_turns: u32) -> Vec<String> {
        vec![
            "-p".to_string(),
            "-".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--dangerously-skip-permissions".to_string(),
            "--max-turns".to_string(),
            max_turns.to_string(),
        ]
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Request id → pid of the live assistant process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<String, u32>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, request_id: &str, pid: u32) {
        self.lock().insert(request_id.to_string(), pid);
    }

    /// Drop the entry without signalling. Returns the pid if it was present.
    pub fn release(&self, request_id: &str) -> Option<u32> {
        self.lock().remove(request_id)
    }

    /// Kill the process tree registered for `request_id`.
    ///
    /// Unknown or already finished ids are a no-op. Returns whether a process
    /// was found.
    pub fn abort(&self, request_id: &str) -> bool {
        let Some(pid) = self.release(request_id) else {
            return false;
        };
        tracing::info!(request_id, pid, "aborting assistant process (client disconnected)");
        let outcome = kill_process_tree(pid);
        tracing::debug!(request_id, pid, ?outcome, "abort signal delivered");
        true
    }

    #[cfg(test)]
    pub fn pid_of(&self, request_id: &str) -> Option<u32> {
        self.lock().get(request_id).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The whole process group was signalled.
    Group,
    /// Only the process itself could be signalled.
    Process,
    AlreadyDead,
}

/// SIGKILL the process group led by `pid`, falling back to the bare pid.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) -> KillOutcome {
    let pid = match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 0 => pid,
        // 0 or -1 would address our own group or every process we may signal.
        _ => return KillOutcome::AlreadyDead,
    };

    // SAFETY: kill(2) only delivers a signal; pid > 0 so -pid names a single group.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } == 0 {
        return KillOutcome::Group;
    }
    // SAFETY: as above.
    if unsafe { libc::kill(pid, libc::SIGKILL) } == 0 {
        return KillOutcome::Process;
    }
    KillOutcome::AlreadyDead
}

#[cfg(not(unix))]
pub fn kill_process_tree(pid: u32) -> KillOutcome {
    if pid == 0 {
        return KillOutcome::AlreadyDead;
    }
    match std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status()
    {
        Ok(status) if status.success() => KillOutcome::Group,
        _ => KillOutcome::AlreadyDead,
    }
}

/// A running assistant process owned by one session.
///
/// Dropping it without calling [`ClaudeProcess::finish`] kills the tree and
/// releases the registry entry.
pub struct ClaudeProcess {
    child: Child,
    pid: Option<u32>,
    request_id: String,
    registry: ProcessRegistry,
    settled: bool,
}

impl ClaudeProcess {
    /// Start the assistant, register it and hand it `prompt` on stdin.
    pub async fn spawn(
        command: &ClaudeCommand,
        prompt: &str,
        request_id: &str,
        registry: &ProcessRegistry,
    ) -> Result<Self, BridgeError> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .current_dir(command.working_dir())
            .env_remove("CLAUDECODE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn {
            program: command.program().to_string(),
            source,
        })?;

        let pid = child.id();
        if let Some(pid) = pid {
            registry.register(request_id, pid);
        }
        tracing::info!(request_id, pid, program = command.program(), "spawned assistant process");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        tracing::debug!(source = "claude-stderr", "{}", line);
                    }
                }
            });
        }

        let mut process = Self {
            child,
            pid,
            request_id: request_id.to_string(),
            registry: registry.clone(),
            settled: false,
        };

        // On failure `process` is dropped, which kills the tree and releases the entry.
        if let Some(mut stdin) = process.child.stdin.take() {
            match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => {}
                // The process closed its end early; its output decides the outcome.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    tracing::debug!(request_id, "assistant closed stdin before reading the prompt");
                }
                Err(e) => return Err(BridgeError::Stdin(e)),
            }
            drop(stdin); // close stdin to signal EOF
        }

        Ok(process)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the process itself to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Natural completion: release the registry entry and schedule a second,
    /// delayed kill for descendants that outlive the leader.
    ///
    /// Returns false when the entry was already gone, i.e. the session was
    /// aborted while the process was exiting.
    pub fn finish(mut self, reap_delay: Duration) -> bool {
        self.settled = true;
        let released = self.registry.release(&self.request_id).is_some();
        if let Some(pid) = self.pid {
            tokio::spawn(async move {
                tokio::time::sleep(reap_delay).await;
                let outcome = kill_process_tree(pid);
                tracing::trace!(pid, ?outcome, "delayed cleanup kill");
            });
        }
        released
    }

    /// Force-kill the tree now and release the registry entry.
    pub fn terminate(mut self) {
        self.kill_now();
    }

    fn kill_now(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.registry.release(&self.request_id);
        if let Some(pid) = self.pid {
            let outcome = kill_process_tree(pid);
            tracing::info!(request_id = %self.request_id, pid, ?outcome, "force killed assistant process");
        } else if let Err(e) = self.child.start_kill() {
            tracing::trace!(error = %e, "assistant kill without pid");
        }
    }
}

impl Drop for ClaudeProcess {
    fn drop(&mut self) {
        self.kill_now();
    }
}
