//! Client tests against an in-process daemon
//!
//! Starts the listener on an ephemeral port and drives it with the same
//! client the `connect` and `servers` commands use.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use termhost::client::{SessionClient, SessionEnd};
use th_core::config::ServerConfig;
use th_core::store::{MemoryIdentityStore, MemoryRegistry};
use th_server::{SessionOrchestrator, TermhostServer};

const WAIT: Duration = Duration::from_secs(10);

struct Daemon {
    addr: SocketAddr,
    token: String,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let sessions_dir = dir.path().join("sessions");

    let identities = Arc::new(MemoryIdentityStore::new());
    let alice = identities.register("alice", "secret").unwrap();
    let token = identities.issue_token(&alice.id).unwrap();
    let registry = Arc::new(MemoryRegistry::new(&sessions_dir));

    let config = ServerConfig {
        sessions_dir,
        shell: Some("/bin/sh".to_string()),
        ..ServerConfig::default()
    };
    let orchestrator = Arc::new(SessionOrchestrator::new(config, identities, registry).unwrap());

    let shutdown = CancellationToken::new();
    let server = TermhostServer::bind("127.0.0.1:0", orchestrator, shutdown.clone())
        .await
        .expect("Failed to bind");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    Daemon {
        addr,
        token,
        shutdown,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_ping_without_auth() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());
    assert!(client.ping().await.unwrap());
}

#[tokio::test]
async fn test_bad_token_is_reported() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());

    let err = client.authenticate("wrong").await.unwrap_err();
    assert!(err.to_string().contains("Authentication failed"));
}

#[tokio::test]
async fn test_list_servers_requires_auth() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());
    assert!(client.list_servers().await.is_err());

    client.authenticate(&daemon.token).await.unwrap();
    let servers = client.list_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "session_alice");
}

#[tokio::test]
async fn test_login_then_line_session() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());
    let token = client.login("alice", "secret").await.unwrap();
    assert_ne!(token, daemon.token);

    let (info, session) = client.open_session(None, |_| {}).await.unwrap();
    assert_eq!(info.server_id, "session_alice");
    assert!(info.pid.is_some());

    let (mut input, input_reader) = tokio::io::duplex(1024);
    let (output_writer, mut output) = tokio::io::duplex(64 * 1024);
    let mut banner = Vec::new();
    let relay = tokio::spawn(async move {
        let end = session
            .run(BufReader::new(input_reader), output_writer, |line| {
                banner.push(line.to_string())
            })
            .await;
        (end, banner)
    });

    input.write_all(b"echo hello from termhost\n").await.unwrap();
    let mut seen = Vec::new();
    let mut buf = [0u8; 256];
    while !String::from_utf8_lossy(&seen).contains("hello from termhost\n") {
        let n = timeout(WAIT, output.read(&mut buf))
            .await
            .expect("Timed out waiting for output")
            .unwrap();
        assert!(n > 0, "Output closed early");
        seen.extend_from_slice(&buf[..n]);
    }
    assert_eq!(String::from_utf8_lossy(&seen), "hello from termhost\n");

    // End of input disconnects
    drop(input);
    let (end, banner) = timeout(WAIT, relay).await.unwrap().unwrap();
    assert_eq!(end.unwrap(), SessionEnd::Disconnected);
    assert!(banner[0].starts_with("Connected to termhost"));
}

#[tokio::test]
async fn test_shell_exit_ends_line_session() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());
    client.authenticate(&daemon.token).await.unwrap();
    let (_, session) = client.open_session(None, |_| {}).await.unwrap();

    let input = BufReader::new(&b"exit 7\n"[..]);
    let end = timeout(WAIT, session.run(input, tokio::io::sink(), |_| {}))
        .await
        .unwrap()
        .unwrap();

    match end {
        SessionEnd::ShellExited(message) => assert!(message.contains("status 7")),
        // The disconnect sent at end of input may win the race
        SessionEnd::Disconnected => {}
        other => panic!("Unexpected end: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_server_fails_to_open() {
    let daemon = start_daemon().await;
    let mut client = SessionClient::new(daemon.addr.to_string());
    client.authenticate(&daemon.token).await.unwrap();

    let err = client
        .open_session(Some("missing"), |_| {})
        .await
        .err()
        .expect("Opening an unknown server should fail");
    assert!(err.to_string().contains("not_found"));
}
