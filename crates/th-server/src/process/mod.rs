//! Interactive shell sessions
//!
//! A [`ProcessSession`] owns one shell process rooted at a server's working
//! root. Input is written to the shell's stdin; stdout and stderr are pumped
//! into a single channel so the peer sees both in arrival order, the same way
//! a terminal would show them.

mod pump;
mod shell;

pub(crate) use pump::{kill_leftovers, own_process_group, signal_group, spawn_pump, GroupSignal};
pub use shell::ShellSpec;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use th_core::{IdentityId, ServerDescriptor, ServerId, SessionError};

/// Environment variable exposing the session's working root
pub const ROOT_ENV_VAR: &str = "TERMHOST_ROOT";

/// Environment variable exposing the session's server ID
pub const SERVER_ENV_VAR: &str = "TERMHOST_SERVER_ID";

/// Buffered output chunks before the pumps wait for the relay
const OUTPUT_BUFFER: usize = 256;

/// How long a terminated shell gets to exit before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a shell process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    /// The shell exited on its own
    Exited,
    /// The shell was terminated by [`ProcessSession::terminate`]
    Killed,
}

impl ProcessState {
    /// Check if the state is final
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Killed)
    }
}

/// Merged stdout/stderr of a shell
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<Bytes>,
}

impl OutputStream {
    /// Next chunk, or `None` once both pipes have closed
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// One interactive shell owned by one connection
#[derive(Debug)]
pub struct ProcessSession {
    owner_id: IdentityId,
    server_id: ServerId,
    working_root: PathBuf,
    pid: Option<u32>,
    child: Child,
    stdin: Option<ChildStdin>,
    output: Option<OutputStream>,
    pumps: Vec<JoinHandle<()>>,
    state: ProcessState,
    exit_code: Option<i32>,
    termination_requests: u32,
    cleaned_up: bool,
}

impl ProcessSession {
    /// Spawn a shell for a descriptor
    ///
    /// The shell runs in the descriptor's working root, which must already
    /// exist, and inherits the host environment plus the configured variables,
    /// [`ROOT_ENV_VAR`] and [`SERVER_ENV_VAR`].
    pub fn start(spec: &ShellSpec, descriptor: &ServerDescriptor) -> Result<Self, SessionError> {
        let working_root = descriptor.working_root.clone();

        let mut cmd = Command::new(spec.program());
        cmd.current_dir(&working_root)
            .envs(spec.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(ROOT_ENV_VAR, &working_root)
            .env(SERVER_ENV_VAR, descriptor.id.as_str())
            .env("PWD", &working_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);

        let mut session = Self::spawn(cmd, spec.program(), descriptor, working_root)?;
        session.state = ProcessState::Running;

        tracing::info!(
            "Spawned shell {} for {} on {} (pid {:?})",
            spec.program(),
            session.owner_id,
            session.server_id,
            session.pid
        );
        Ok(session)
    }

    fn spawn(
        mut cmd: Command,
        program: &str,
        descriptor: &ServerDescriptor,
        working_root: PathBuf,
    ) -> Result<Self, SessionError> {
        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Process(format!("failed to spawn {}: {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            pumps.push(spawn_pump(stdout, tx.clone(), "shell stdout"));
        }
        if let Some(stderr) = stderr {
            pumps.push(spawn_pump(stderr, tx, "shell stderr"));
        }

        Ok(Self {
            owner_id: descriptor.owner_id.clone(),
            server_id: descriptor.id.clone(),
            working_root,
            pid: child.id(),
            child,
            stdin,
            output: Some(OutputStream { rx }),
            pumps,
            state: ProcessState::Starting,
            exit_code: None,
            termination_requests: 0,
            cleaned_up: false,
        })
    }

    /// Identity that owns this session
    pub fn owner_id(&self) -> &IdentityId {
        &self.owner_id
    }

    /// Server this session belongs to
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Directory the shell was started in
    pub fn working_root(&self) -> &Path {
        &self.working_root
    }

    /// Shell process ID
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Check if the shell still accepts input
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// Exit code, once the shell has ended
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Number of times [`terminate`](Self::terminate) has been called
    pub fn termination_requests(&self) -> u32 {
        self.termination_requests
    }

    /// Take the merged output stream (only once)
    pub fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    /// Write raw input to the shell
    pub async fn send(&mut self, input: &[u8]) -> Result<(), SessionError> {
        if self.state != ProcessState::Running {
            return Err(SessionError::NotRunning);
        }
        let stdin = self.stdin.as_mut().ok_or(SessionError::NotRunning)?;

        stdin
            .write_all(input)
            .await
            .map_err(|e| SessionError::Process(format!("write to shell failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| SessionError::Process(format!("write to shell failed: {}", e)))?;
        Ok(())
    }

    /// Write one command line, terminated by a newline
    pub async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let mut input = Vec::with_capacity(line.len() + 1);
        input.extend_from_slice(line.as_bytes());
        input.push(b'\n');
        self.send(&input).await
    }

    /// Wait for the shell to exit on its own
    ///
    /// Cancel safe. Moves the state to `Exited` unless the session was
    /// already terminated.
    pub async fn wait(&mut self) -> Option<i32> {
        let code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!("Failed to wait for shell on {}: {}", self.server_id, e);
                None
            }
        };

        if !self.state.is_terminal() {
            self.state = ProcessState::Exited;
            self.exit_code = code;
            tracing::info!(
                "Shell for {} on {} exited with {:?}",
                self.owner_id,
                self.server_id,
                code
            );
        }
        code
    }

    /// Terminate the shell and everything in its process group
    ///
    /// Idempotent: only the first call signals anything. A shell that is
    /// still running ends up `Killed`; one that already exited stays
    /// `Exited`, but leftovers in its process group are still reclaimed.
    pub async fn terminate(&mut self) -> Option<i32> {
        self.termination_requests += 1;
        if self.cleaned_up {
            return self.exit_code;
        }
        self.cleaned_up = true;

        tracing::info!(
            "Terminating shell for {} on {} (pid {:?})",
            self.owner_id,
            self.server_id,
            self.pid
        );

        // Closing stdin lets a well-behaved shell exit on its own
        self.stdin.take();

        if !self.state.is_terminal() {
            if let Some(pid) = self.pid {
                signal_group(pid, GroupSignal::Terminate);
            }

            let status = match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    tracing::warn!("Failed to wait for shell: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!("Shell ignored SIGTERM, killing its process group");
                    // The unreaped leader keeps the group id reserved
                    if let Some(pid) = self.pid {
                        signal_group(pid, GroupSignal::Kill);
                    }
                    if let Err(e) = self.child.start_kill() {
                        tracing::debug!("start_kill failed: {}", e);
                    }
                    self.child.wait().await.ok()
                }
            };

            self.exit_code = status.and_then(|s| s.code());
            self.state = ProcessState::Killed;
        }

        // Background jobs can outlive the leader
        if let Some(pid) = self.pid {
            kill_leftovers(pid);
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }

        self.exit_code
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }
        tracing::warn!(
            "Shell for {} on {} dropped without terminate, killing",
            self.owner_id,
            self.server_id
        );
        if let Some(pid) = self.pid {
            if self.state == ProcessState::Exited {
                kill_leftovers(pid);
            } else {
                signal_group(pid, GroupSignal::Kill);
            }
        }
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use th_core::config::ServerConfig;

    fn spec() -> ShellSpec {
        ShellSpec::from_config(&ServerConfig {
            shell: Some("/bin/sh".to_string()),
            ..ServerConfig::default()
        })
        .unwrap()
    }

    fn descriptor(root: &Path) -> ServerDescriptor {
        ServerDescriptor::implicit_shell(&IdentityId::new("alice"), root)
    }

    async fn read_until(output: &mut OutputStream, needle: &str) -> String {
        let mut collected = Vec::new();
        while !String::from_utf8_lossy(&collected).contains(needle) {
            match tokio::time::timeout(Duration::from_secs(5), output.recv()).await {
                Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
                _ => break,
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[tokio::test]
    async fn test_shell_runs_in_working_root() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(dir.path());
        std::fs::create_dir_all(&descriptor.working_root).unwrap();

        let mut session = ProcessSession::start(&spec(), &descriptor).unwrap();
        assert_eq!(session.state(), ProcessState::Running);
        let mut output = session.take_output().unwrap();

        session
            .send_line("echo \"root=$TERMHOST_ROOT\"; pwd")
            .await
            .unwrap();
        let text = read_until(&mut output, "\n/").await;
        assert!(text.contains(&format!("root={}", descriptor.working_root.display())));

        session.terminate().await;
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(dir.path());
        std::fs::create_dir_all(&descriptor.working_root).unwrap();

        let mut session = ProcessSession::start(&spec(), &descriptor).unwrap();
        let mut output = session.take_output().unwrap();

        session.send_line("echo oops 1>&2").await.unwrap();
        assert!(read_until(&mut output, "oops").await.contains("oops"));

        session.terminate().await;
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(dir.path());
        std::fs::create_dir_all(&descriptor.working_root).unwrap();

        let mut session = ProcessSession::start(&spec(), &descriptor).unwrap();
        session.terminate().await;
        assert_eq!(session.state(), ProcessState::Killed);

        session.terminate().await;
        assert_eq!(session.state(), ProcessState::Killed);
        assert_eq!(session.termination_requests(), 2);

        assert!(matches!(
            session.send_line("echo hi").await,
            Err(SessionError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_self_exit_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(dir.path());
        std::fs::create_dir_all(&descriptor.working_root).unwrap();

        let mut session = ProcessSession::start(&spec(), &descriptor).unwrap();
        session.send_line("exit 3").await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), session.wait())
            .await
            .unwrap();
        assert_eq!(code, Some(3));
        assert_eq!(session.state(), ProcessState::Exited);

        session.terminate().await;
        assert_eq!(session.state(), ProcessState::Exited);
        assert_eq!(session.exit_code(), Some(3));
    }

    /// Killed orphans linger as zombies where nothing reaps them
    #[cfg(unix)]
    fn is_zombie(pid: libc::pid_t) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| stat.rsplit_once(')').map(|(_, rest)| rest.trim_start().starts_with('Z')))
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_exit_reclaims_background_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(dir.path());
        std::fs::create_dir_all(&descriptor.working_root).unwrap();

        let mut session = ProcessSession::start(&spec(), &descriptor).unwrap();
        let mut output = session.take_output().unwrap();
        session
            .send_line("sleep 30 & echo \"bg=$!\"")
            .await
            .unwrap();
        let text = read_until(&mut output, "\n").await;
        let background: libc::pid_t = text
            .trim()
            .strip_prefix("bg=")
            .and_then(|pid| pid.parse().ok())
            .unwrap();

        session.send_line("exit 0").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.wait())
            .await
            .unwrap();
        assert_eq!(session.state(), ProcessState::Exited);

        session.terminate().await;
        let mut alive = true;
        for _ in 0..50 {
            alive = unsafe { libc::kill(background, 0) } == 0 && !is_zombie(background);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background job outlived the session");
    }

    #[tokio::test]
    async fn test_missing_working_root_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = descriptor(&dir.path().join("does-not-exist"));

        let err = ProcessSession::start(&spec(), &descriptor).unwrap_err();
        assert!(matches!(err, SessionError::Process(_)));
    }
}
