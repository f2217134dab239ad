//! Output pumping and process-group signals

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Size of a single read from a child pipe
const READ_CHUNK: usize = 4096;

/// Forward everything read from `reader` into `tx` until EOF
///
/// Several pumps may share one sender; chunks then interleave in the order
/// they were read.
pub(crate) fn spawn_pump<R>(mut reader: R, tx: mpsc::Sender<Bytes>, label: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("{} read error: {}", label, e);
                    break;
                }
            }
        }
        tracing::trace!("{} pump finished", label);
    })
}

/// Signal delivered to a whole process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupSignal {
    Terminate,
    Kill,
}

/// Send a signal to the process group led by `pgid`
///
/// Children are spawned as group leaders, so this reaches anything they
/// started in the foreground or background.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, signal: GroupSignal) -> bool {
    let signal = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg has no memory-safety preconditions
    unsafe { libc::killpg(pgid as libc::pid_t, signal) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pgid: u32, _signal: GroupSignal) -> bool {
    false
}

/// SIGKILL what is left of a group whose leader was already reaped
///
/// Only signals while the group still has members. Once it is empty the id
/// is free for reuse and must not be signalled.
pub(crate) fn kill_leftovers(pgid: u32) {
    if group_has_members(pgid) {
        tracing::debug!("Killing leftovers in process group {}", pgid);
        signal_group(pgid, GroupSignal::Kill);
    } else {
        tracing::trace!("Process group {} is already empty", pgid);
    }
}

#[cfg(unix)]
fn group_has_members(pgid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::killpg(pgid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn group_has_members(_pgid: u32) -> bool {
    false
}

/// Make a command its own process group leader
pub(crate) fn own_process_group(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_forwards_until_eof() {
        let (tx, mut rx) = mpsc::channel(8);
        let data: &[u8] = b"hello pump";
        let handle = spawn_pump(data, tx, "test");
        handle.await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello pump");
    }
}
