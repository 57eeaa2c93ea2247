//! Stdio transport: child process ownership and line-delimited framing.
//!
//! The transport spawns the configured command, frames one JSON message per
//! LF-delimited line on the child's stdin/stdout, and drains stderr into the
//! log tagged with the server name. Malformed frames are logged and skipped;
//! they do not close the transport. EOF on stdout does.

use crate::error::McpError;
use relay_config::ServerConfig;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

/// How long a child gets to exit after stdin EOF before being killed.
const GRACEFUL_EXIT_SECS: u64 = 5;

/// Async stdio transport for one backend process.
pub struct StdioTransport {
    server: String,
    write_tx: mpsc::Sender<String>,
    inbound_rx: Option<mpsc::Receiver<serde_json::Value>>,
    closed_rx: watch::Receiver<bool>,
    child: Arc<Mutex<Child>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the configured command and start the framing tasks.
    ///
    /// The child inherits the hub's environment with the server's `env`
    /// overlay applied on top; overlay keys take precedence.
    pub fn spawn(server: &str, config: &ServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            server: server.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        // Writer task: drains the channel onto child stdin, one frame per line.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let closed_for_writer = Arc::clone(&closed_tx);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    closed_for_writer.send_replace(true);
                    break;
                }
            }
        });

        // Reader task: one JSON frame per stdout line, delivered in order.
        let (inbound_tx, inbound_rx) = mpsc::channel::<serde_json::Value>(64);
        let reader_server = server.to_string();
        let closed_for_reader = Arc::clone(&closed_tx);
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let frame: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            server = %reader_server,
                            "dropping malformed frame: {e}: {line}"
                        );
                        continue;
                    }
                };
                if inbound_tx.send(frame).await.is_err() {
                    break;
                }
            }
            closed_for_reader.send_replace(true);
        });

        // Stderr task: surface diagnostics tagged with the server name.
        let stderr_server = server.to_string();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(server = %stderr_server, "stderr: {line}");
            }
        });

        Ok(Self {
            server: server.to_string(),
            write_tx,
            inbound_rx: Some(inbound_rx),
            closed_rx,
            child: Arc::new(Mutex::new(child)),
            reader_handle,
            writer_handle,
            stderr_handle,
        })
    }

    /// Send one framed message. Fails once the transport is closed.
    pub async fn send<T: serde::Serialize>(&self, frame: &T) -> Result<(), McpError> {
        if *self.closed_rx.borrow() {
            return Err(McpError::Closed {
                server: self.server.clone(),
            });
        }
        let serialized = serde_json::to_string(frame)?;
        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| McpError::Closed {
                server: self.server.clone(),
            })
    }

    /// Take the inbound frame stream. Yields frames in arrival order; the
    /// channel closes when the child's stdout reaches EOF.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<serde_json::Value>> {
        self.inbound_rx.take()
    }

    /// A watch that flips to `true` when the transport closes.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Shut down: EOF the child's stdin, give it a grace window, then kill.
    pub async fn shutdown(self) {
        drop(self.write_tx);

        let child = self.child;
        let graceful = tokio::time::timeout(
            std::time::Duration::from_secs(GRACEFUL_EXIT_SECS),
            async {
                let mut child = child.lock().await;
                let _ = child.wait().await;
            },
        )
        .await;

        if graceful.is_err() {
            let mut child = child.lock().await;
            let _ = child.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> ServerConfig {
        ServerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Default::default(),
        }
    }

    #[tokio::test]
    async fn spawn_echo_process() {
        let transport = StdioTransport::spawn("echo", &config("cat", &[]));
        assert!(transport.is_ok());
        transport.unwrap().shutdown().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = StdioTransport::spawn("bad", &config("this_command_does_not_exist_xyz123", &[]));
        match result {
            Err(McpError::SpawnFailed { server, .. }) => assert_eq!(server, "bad"),
            Err(other) => panic!("expected SpawnFailed, got {other:?}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn frames_roundtrip_through_cat() {
        let mut transport = StdioTransport::spawn("echo", &config("cat", &[])).unwrap();
        let mut frames = transport.take_frames().unwrap();

        transport
            .send(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), frames.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame["id"], 1);
        assert_eq!(frame["method"], "ping");

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_not_fatal() {
        // The child prints garbage, then a valid frame, then echoes stdin.
        let script = r#"echo 'not json'; echo '{"jsonrpc":"2.0","id":9,"result":{}}'; cat"#;
        let mut transport =
            StdioTransport::spawn("mock", &config("bash", &["-c", script])).unwrap();
        let mut frames = transport.take_frames().unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), frames.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame["id"], 9);
        assert!(!transport.is_closed());

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn closed_watch_flips_on_child_exit() {
        let transport = StdioTransport::spawn("mock", &config("true", &[])).unwrap();
        let mut closed = transport.closed();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !*closed.borrow() {
                closed.changed().await.unwrap();
            }
        })
        .await
        .expect("close observed within deadline");

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn env_overlay_reaches_child() {
        let mut cfg = config("bash", &["-c", r#"echo "{\"var\":\"$RELAY_TEST_VAR\"}""#]);
        cfg.env
            .insert("RELAY_TEST_VAR".to_string(), "overlaid".to_string());
        let mut transport = StdioTransport::spawn("mock", &cfg).unwrap();
        let mut frames = transport.take_frames().unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), frames.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame["var"], "overlaid");

        transport.shutdown().await;
    }
}
