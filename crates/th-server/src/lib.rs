//! th-server: termhost session orchestrator
//!
//! Accepts peer connections, authenticates them against an identity store,
//! resolves the server each one asks for, provisions repository servers and
//! relays commands and output between the peer and a shell rooted in the
//! server's working root. Each connection owns exactly one shell, which is
//! terminated when the connection ends.

pub mod connection;
pub mod daemon;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod sandbox;
pub mod server;

pub use connection::{ConnectionEnd, ConnectionSummary};
pub use orchestrator::{ensure_working_root, SessionOrchestrator};
pub use pipeline::{Pipeline, PipelineEvent, PipelineRun, Stage, StageOutcome};
pub use process::{ProcessSession, ProcessState, ShellSpec};
pub use sandbox::{check_chdir, ChdirVerdict, CommandVerdict, SandboxGuard};
pub use server::TermhostServer;
