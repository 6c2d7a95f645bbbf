//! Subprocess transport: a local child speaking NDJSON on stdin/stdout.

use crate::config::ClientConfig;
use crate::error::{TransportError, TransportResult};
use crate::framing::LineReader;
use crate::{Transport, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use mcpbridge_core::MAX_MESSAGE_BYTES;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::AnyDelimiterCodecError;
use tracing::{debug, info, warn};

/// Session with a spawned child process.
///
/// The child's stdout is the inbound side and its stdin the outbound side.
/// Its stderr is always drained by a background task and echoed on the
/// `mcpbridge::server` target at debug level. Stdout lines longer than
/// [`MAX_MESSAGE_BYTES`] are discarded without being buffered whole.
pub struct SubprocessTransport {
    program: String,
    args: Vec<String>,
    close_grace: Duration,
    max_frame_bytes: usize,
    child: Mutex<Option<Child>>,
    /// `None` once closed; the write path checks it under the same lock.
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<LineReader<ChildStdout>>>,
    stderr_drain: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SubprocessTransport {
    pub fn new(program: impl Into<String>, args: Vec<String>, config: &ClientConfig) -> Self {
        Self {
            program: program.into(),
            args,
            close_grace: config.close_grace,
            max_frame_bytes: MAX_MESSAGE_BYTES,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            stderr_drain: std::sync::Mutex::new(None),
        }
    }

    /// OS process ID of the running child.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Wait for the child to exit on its own, killing it after the grace period.
    async fn reap(&self, mut child: Child) -> TransportResult<ExitStatus> {
        match tokio::time::timeout(self.close_grace, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    program = %self.program,
                    grace_ms = self.close_grace.as_millis() as u64,
                    "Child did not exit after stdin closed, killing"
                );
                child.kill().await?;
                Ok(child.wait().await?)
            }
        }
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Subprocess
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if self.child.get_mut().is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::connect_failed(format!("failed to spawn {}: {e}", self.program))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            return Err(TransportError::connect_failed("child pipes unavailable"));
        };

        let program = self.program.clone();
        let drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(target: "mcpbridge::server", program = %program, "{}", line)
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "Child stderr read failed");
                        break;
                    }
                }
            }
        });

        info!(program = %self.program, pid = ?child.id(), "Spawned child process");

        *self.child.get_mut() = Some(child);
        *self.stdin.get_mut() = Some(stdin);
        *self.stdout.get_mut() = Some(LineReader::new(stdout, self.max_frame_bytes));
        *self
            .stderr_drain
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(drain);
        Ok(())
    }

    async fn read(&self) -> TransportResult<Option<Bytes>> {
        let mut stdout = self.stdout.lock().await;
        let Some(reader) = stdout.as_mut() else {
            return Ok(None);
        };

        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    let mut frame = Vec::with_capacity(line.len() + 1);
                    frame.extend_from_slice(&line);
                    frame.push(b'\n');
                    return Ok(Some(Bytes::from(frame)));
                }
                Ok(None) => {
                    debug!(program = %self.program, "Child closed stdout");
                    return Ok(None);
                }
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    warn!(
                        target: "mcpbridge::server",
                        program = %self.program,
                        max_bytes = self.max_frame_bytes,
                        "Dropping oversized line from child"
                    );
                }
                Err(AnyDelimiterCodecError::Io(e)) => return Err(e.into()),
            }
        }
    }

    async fn write(&self, frame: &[u8]) -> TransportResult<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(TransportError::WriteAfterClose)?;

        pipe.write_all(frame).await?;
        if frame.last() != Some(&b'\n') {
            pipe.write_all(b"\n").await?;
        }
        pipe.flush().await?;
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        // Closing stdin is the child's cue to exit.
        if self.stdin.lock().await.take().is_none() {
            return Ok(());
        }

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            let status = self.reap(child).await?;
            if status.success() {
                debug!(program = %self.program, "Child exited cleanly");
            } else {
                let err = TransportError::ProcessExitNonZero {
                    code: status.code(),
                };
                warn!(program = %self.program, error = %err, "Child exited abnormally");
            }
        }

        // A reader may still hold stdout; it sees EOF now that the child is gone.
        if let Ok(mut stdout) = self.stdout.try_lock() {
            stdout.take();
        }
        let drain = self
            .stderr_drain
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(drain) = drain {
            let _ = tokio::time::timeout(self.close_grace, drain).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            close_grace: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn spawn(program: &str, args: &[&str]) -> SubprocessTransport {
        let mut transport = SubprocessTransport::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            &config(),
        );
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let transport = spawn("cat", &[]).await;

        transport.write(b"ping\n").await.unwrap();
        let frame = transport.read().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"ping\n");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_appends_newline() {
        let transport = spawn("cat", &[]).await;

        transport.write(br#"{"jsonrpc":"2.0","method":"a"}"#).await.unwrap();
        let frame = transport.read().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"{\"jsonrpc\":\"2.0\",\"method\":\"a\"}\n");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_close() {
        let transport = spawn("cat", &[]).await;
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        assert!(matches!(
            transport.write(b"ping\n").await,
            Err(TransportError::WriteAfterClose)
        ));
        assert!(transport.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_exit_is_eof() {
        let transport = spawn("echo", &["hello"]).await;

        assert_eq!(&transport.read().await.unwrap().unwrap()[..], b"hello\n");
        assert!(transport.read().await.unwrap().is_none());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let transport = spawn("sh", &["-c", "echo oops >&2; exit 3"]).await;
        assert!(transport.read().await.unwrap().is_none());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stubborn_child_is_killed() {
        let transport = spawn("sh", &["-c", "exec sleep 30"]).await;
        assert!(transport.pid().await.is_some());

        let started = std::time::Instant::now();
        transport.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped() {
        let transport = spawn(
            "sh",
            &[
                "-c",
                "dd if=/dev/zero bs=1048576 count=11 2>/dev/null | tr '\\000' x; echo; echo after",
            ],
        )
        .await;

        let frame = transport.read().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"after\n");
        assert!(transport.read().await.unwrap().is_none());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_unterminated_output_is_eof() {
        let mut transport = SubprocessTransport::new(
            "sh",
            vec!["-c".to_string(), "printf '%0200d' 7".to_string()],
            &config(),
        );
        transport.max_frame_bytes = 64;
        transport.connect().await.unwrap();

        assert!(transport.read().await.unwrap().is_none());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut transport =
            SubprocessTransport::new("/nonexistent/mcp-server", Vec::new(), &config());
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectFailed { .. })
        ));
    }
}
