//! Provisioning pipeline for repository servers
//!
//! Runs clone then build for a descriptor, reporting each stage as a
//! [`PipelineEvent`]. A failing stage never stops the pipeline: it always
//! ends with [`PipelineEvent::Ready`] so the shell can start and the owner
//! can look at what went wrong. The start command is not run here; it is
//! handed back in `Ready` for the connection to inject once the shell is up.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use th_core::config::PipelineConfig;
use th_core::ServerDescriptor;

use crate::process::{own_process_group, signal_group, spawn_pump, GroupSignal};

/// Directory whose presence means the working root is already cloned
const VCS_MARKER: &str = ".git";

/// How long step output is still collected after the step exits
const STEP_DRAIN: Duration = Duration::from_millis(200);

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clone,
    Build,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Clone => write!(f, "clone"),
            Stage::Build => write!(f, "build"),
        }
    }
}

/// Result of a stage that ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure,
}

/// Progress reported while provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A stage is about to run
    Started { stage: Stage, description: String },
    /// A stage ran to an outcome; `detail` holds its captured output or the
    /// reason it failed
    Finished {
        stage: Stage,
        outcome: StageOutcome,
        detail: String,
    },
    /// A stage's precondition was already satisfied
    Skipped { stage: Stage, reason: String },
    /// Provisioning is over; always the last event
    Ready { start_command: Option<String> },
}

impl PipelineEvent {
    /// Human-readable progress line for the peer
    pub fn progress_line(&self) -> String {
        match self {
            PipelineEvent::Started { stage, description } => {
                format!("[{}] {}", stage, description)
            }
            PipelineEvent::Finished {
                stage,
                outcome: StageOutcome::Success,
                detail,
            } => {
                if detail.is_empty() {
                    format!("[{}] ok", stage)
                } else {
                    format!("[{}] ok\n{}", stage, detail)
                }
            }
            PipelineEvent::Finished {
                stage,
                outcome: StageOutcome::Failure,
                detail,
            } => format!("[{}] failed: {}", stage, detail),
            PipelineEvent::Skipped { stage, reason } => {
                format!("[{}] skipped: {}", stage, reason)
            }
            PipelineEvent::Ready { start_command: None } => "[ready] provisioning finished".to_string(),
            PipelineEvent::Ready {
                start_command: Some(cmd),
            } => format!("[ready] provisioning finished, start command: {}", cmd),
        }
    }
}

/// Runs pipelines with shared settings
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start provisioning a descriptor in the background
    ///
    /// Cancelling `cancel` kills the running step; the remaining stages are
    /// not run and no `Ready` is sent.
    pub fn provision(&self, descriptor: &ServerDescriptor, cancel: CancellationToken) -> PipelineRun {
        let (tx, rx) = mpsc::channel(16);
        let runner = Runner {
            config: self.config.clone(),
            working_root: descriptor.working_root.clone(),
            source: descriptor.source().map(str::to_string),
            build: descriptor.build().map(str::to_string),
            start: descriptor.start().map(str::to_string),
            tx,
            cancel,
        };

        let server_id = descriptor.id.clone();
        let handle = tokio::spawn(async move {
            runner.run().await;
            tracing::debug!("Pipeline for {} finished", server_id);
        });

        PipelineRun { events: rx, handle }
    }
}

/// A pipeline in progress
#[derive(Debug)]
pub struct PipelineRun {
    events: mpsc::Receiver<PipelineEvent>,
    handle: JoinHandle<()>,
}

impl PipelineRun {
    /// Next event, or `None` when the pipeline has stopped
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        self.events.recv().await
    }

    /// Drain every event until the pipeline stops
    pub async fn collect(mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        if let Err(e) = self.handle.await {
            tracing::warn!("Pipeline task failed: {}", e);
        }
        events
    }
}

struct Runner {
    config: PipelineConfig,
    working_root: PathBuf,
    source: Option<String>,
    build: Option<String>,
    start: Option<String>,
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self) {
        if !self.clone_stage().await {
            return;
        }
        if !self.build_stage().await {
            return;
        }
        self.emit(PipelineEvent::Ready {
            start_command: self.start.clone(),
        })
        .await;
    }

    /// Returns false if the pipeline should stop
    async fn emit(&self, event: PipelineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn clone_stage(&self) -> bool {
        if is_cloned(&self.working_root) {
            return self
                .emit(PipelineEvent::Skipped {
                    stage: Stage::Clone,
                    reason: "working root is already a repository".to_string(),
                })
                .await;
        }

        let Some(source) = &self.source else {
            return self
                .emit(PipelineEvent::Finished {
                    stage: Stage::Clone,
                    outcome: StageOutcome::Failure,
                    detail: "no source location".to_string(),
                })
                .await;
        };

        let started = PipelineEvent::Started {
            stage: Stage::Clone,
            description: format!("cloning {} into {}", source, self.working_root.display()),
        };
        if !self.emit(started).await {
            return false;
        }

        let mut cmd = Command::new(&self.config.git_program);
        cmd.arg("clone")
            .arg("--")
            .arg(source)
            .arg(&self.working_root)
            .env("GIT_TERMINAL_PROMPT", "0");
        let Some(result) = self.run_step(Stage::Clone, cmd).await else {
            return false;
        };
        self.emit(result).await
    }

    async fn build_stage(&self) -> bool {
        let Some(build) = &self.build else {
            return self
                .emit(PipelineEvent::Skipped {
                    stage: Stage::Build,
                    reason: "no build command".to_string(),
                })
                .await;
        };

        let started = PipelineEvent::Started {
            stage: Stage::Build,
            description: format!("running {}", build),
        };
        if !self.emit(started).await {
            return false;
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(build);
        let Some(result) = self.run_step(Stage::Build, cmd).await else {
            return false;
        };
        self.emit(result).await
    }

    /// Run one step to an outcome; `None` if cancelled
    async fn run_step(&self, stage: Stage, mut cmd: Command) -> Option<PipelineEvent> {
        let finished = |outcome, detail| PipelineEvent::Finished {
            stage,
            outcome,
            detail,
        };

        cmd.current_dir(&self.working_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to start {} step: {}", stage, e);
                return Some(finished(
                    StageOutcome::Failure,
                    format!("failed to start: {}", e),
                ));
            }
        };
        let pid = child.id();

        let (tx, mut rx) = mpsc::channel::<Bytes>(64);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, tx.clone(), "step stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, tx, "step stderr"));
        }

        let limit = self.config.max_step_output;
        let mut captured = CappedOutput::new(limit);
        let run = async {
            let status = loop {
                tokio::select! {
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => captured.push(&chunk),
                        None => break child.wait().await,
                    },
                    status = child.wait() => break status,
                }
            };
            // Background jobs started by the step can hold the pipes open
            let drain = tokio::time::sleep(STEP_DRAIN);
            tokio::pin!(drain);
            loop {
                tokio::select! {
                    chunk = rx.recv() => match chunk {
                        Some(chunk) => captured.push(&chunk),
                        None => break,
                    },
                    () = &mut drain => break,
                }
            }
            status
        };

        enum Ended {
            Exited(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let ended = tokio::select! {
            result = tokio::time::timeout(self.config.step_timeout, run) => match result {
                Ok(status) => Ended::Exited(status),
                Err(_) => Ended::TimedOut,
            },
            _ = self.cancel.cancelled() => Ended::Cancelled,
        };

        if !matches!(ended, Ended::Exited(_)) {
            if let Some(pid) = pid {
                signal_group(pid, GroupSignal::Kill);
            }
            if let Err(e) = child.start_kill() {
                tracing::debug!("start_kill failed: {}", e);
            }
            let _ = child.wait().await;
        }
        for pump in pumps {
            pump.abort();
        }

        let output = captured.into_string();
        let event = match ended {
            Ended::Exited(Ok(status)) if status.success() => {
                tracing::info!("{} step succeeded in {}", stage, self.working_root.display());
                finished(StageOutcome::Success, output)
            }
            Ended::Exited(Ok(status)) => {
                tracing::warn!("{} step failed with {}", stage, status);
                finished(StageOutcome::Failure, with_output(status.to_string(), &output))
            }
            Ended::Exited(Err(e)) => finished(StageOutcome::Failure, format!("wait failed: {}", e)),
            Ended::TimedOut => {
                tracing::warn!("{} step timed out", stage);
                finished(
                    StageOutcome::Failure,
                    with_output(
                        format!("timed out after {}", format_duration(self.config.step_timeout)),
                        &output,
                    ),
                )
            }
            Ended::Cancelled => {
                tracing::info!("{} step cancelled", stage);
                return None;
            }
        };
        Some(event)
    }
}

fn with_output(reason: String, output: &str) -> String {
    if output.is_empty() {
        reason
    } else {
        format!("{}\n{}", reason, output)
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Step output kept up to a byte limit
struct CappedOutput {
    buf: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl CappedOutput {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        let keep = room.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        if self.dropped > 0 {
            text.push_str(&format!(
                "\n[output truncated, {} bytes omitted]",
                self.dropped
            ));
        }
        text
    }
}

/// Check whether a working root already holds a clone
fn is_cloned(working_root: &Path) -> bool {
    working_root.join(VCS_MARKER).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use th_core::{IdentityId, ServerId, ServerKind};

    fn repository(root: &Path, source: &str, build: &str, start: &str) -> ServerDescriptor {
        ServerDescriptor {
            id: ServerId::new("api"),
            owner_id: IdentityId::new("bob"),
            display_name: "api".to_string(),
            kind: ServerKind::Repository,
            source_location: Some(source.to_string()),
            build_command: Some(build.to_string()),
            start_command: Some(start.to_string()),
            working_root: root.to_path_buf(),
        }
    }

    fn cloned_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(VCS_MARKER)).unwrap();
        dir
    }

    fn stages(events: &[PipelineEvent]) -> Vec<(Stage, &'static str)> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Finished {
                    stage,
                    outcome: StageOutcome::Success,
                    ..
                } => Some((*stage, "success")),
                PipelineEvent::Finished {
                    stage,
                    outcome: StageOutcome::Failure,
                    ..
                } => Some((*stage, "failure")),
                PipelineEvent::Skipped { stage, .. } => Some((*stage, "skipped")),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_build_is_skipped_and_ready() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "https://example.invalid/x.git", "  ", "");

        let events = Pipeline::new(PipelineConfig::default())
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(
            stages(&events),
            vec![(Stage::Clone, "skipped"), (Stage::Build, "skipped")]
        );
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Ready {
                start_command: None
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_source_fails_clone_but_reaches_ready() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-repo");
        let root = dir.path().join("work");
        std::fs::create_dir_all(&root).unwrap();
        let descriptor = repository(&root, &missing.to_string_lossy(), "", "npm start");

        let events = Pipeline::new(PipelineConfig::default())
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(
            stages(&events),
            vec![(Stage::Clone, "failure"), (Stage::Build, "skipped")]
        );
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::Ready {
                start_command: Some("npm start".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_missing_git_program_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = repository(dir.path(), "https://example.invalid/x.git", "", "");
        let config = PipelineConfig {
            git_program: "/nonexistent/git".to_string(),
            ..PipelineConfig::default()
        };

        let events = Pipeline::new(config)
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        match &events[1] {
            PipelineEvent::Finished {
                stage: Stage::Clone,
                outcome: StageOutcome::Failure,
                detail,
            } => assert!(detail.starts_with("failed to start")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.last(), Some(PipelineEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_build_output_is_captured() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "unused", "echo built; echo warned 1>&2", "");

        let events = Pipeline::new(PipelineConfig::default())
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        let detail = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Finished {
                    stage: Stage::Build,
                    outcome: StageOutcome::Success,
                    detail,
                } => Some(detail.clone()),
                _ => None,
            })
            .unwrap();
        assert!(detail.contains("built"));
        assert!(detail.contains("warned"));
    }

    #[tokio::test]
    async fn test_build_failure_reports_status() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "unused", "echo nope; exit 7", "");

        let events = Pipeline::new(PipelineConfig::default())
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(
            stages(&events),
            vec![(Stage::Clone, "skipped"), (Stage::Build, "failure")]
        );
        assert!(matches!(events.last(), Some(PipelineEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "unused", "sleep 30", "");
        let config = PipelineConfig {
            step_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        };

        let events = Pipeline::new(config)
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        let failure = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Finished {
                    outcome: StageOutcome::Failure,
                    detail,
                    ..
                } => Some(detail.clone()),
                _ => None,
            })
            .unwrap();
        assert!(failure.starts_with("timed out after 200ms"));
        assert!(matches!(events.last(), Some(PipelineEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_background_job_does_not_hold_build_open() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "unused", "sleep 5 & echo built", "");
        let config = PipelineConfig {
            step_timeout: Duration::from_secs(2),
            ..PipelineConfig::default()
        };

        let started = std::time::Instant::now();
        let events = Pipeline::new(config)
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let build = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Finished {
                    stage: Stage::Build,
                    outcome,
                    detail,
                } => Some((*outcome, detail.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(build.0, StageOutcome::Success);
        assert_eq!(build.1, "built");
        assert!(matches!(events.last(), Some(PipelineEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_output_cap() {
        let dir = cloned_root();
        let descriptor = repository(
            dir.path(),
            "unused",
            "i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done",
            "",
        );
        let config = PipelineConfig {
            max_step_output: 100,
            ..PipelineConfig::default()
        };

        let events = Pipeline::new(config)
            .provision(&descriptor, CancellationToken::new())
            .collect()
            .await;

        let detail = events
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Finished {
                    stage: Stage::Build,
                    detail,
                    ..
                } => Some(detail.clone()),
                _ => None,
            })
            .unwrap();
        assert!(detail.contains("[output truncated, 2100 bytes omitted]"));
    }

    #[tokio::test]
    async fn test_cancel_stops_without_ready() {
        let dir = cloned_root();
        let descriptor = repository(dir.path(), "unused", "sleep 30", "");
        let cancel = CancellationToken::new();

        let mut run = Pipeline::new(PipelineConfig::default()).provision(&descriptor, cancel.clone());
        // Clone skipped, build started
        assert!(matches!(run.next().await, Some(PipelineEvent::Skipped { .. })));
        assert!(matches!(run.next().await, Some(PipelineEvent::Started { .. })));

        cancel.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(5), run.collect())
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_progress_lines() {
        let event = PipelineEvent::Finished {
            stage: Stage::Clone,
            outcome: StageOutcome::Failure,
            detail: "exit status: 128".to_string(),
        };
        assert_eq!(event.progress_line(), "[clone] failed: exit status: 128");

        let skipped = PipelineEvent::Skipped {
            stage: Stage::Build,
            reason: "no build command".to_string(),
        };
        assert_eq!(skipped.progress_line(), "[build] skipped: no build command");
    }
}
