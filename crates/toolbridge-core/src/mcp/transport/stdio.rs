//! Child-process carrier
//!
//! Spawns a subprocess and exchanges newline-delimited JSON over its
//! stdin/stdout. Also backs the Docker transport, which is a `docker` CLI
//! child process.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{Carrier, InboundSink};
use crate::domain::StdioConfig;
use crate::mcp::error::McpError;

const READ_CHUNK_BYTES: usize = 8192;
const EXIT_GRACE: Duration = Duration::from_secs(5);
const STDOUT_DRAIN: Duration = Duration::from_secs(1);

/// How to launch the child process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl From<&StdioConfig> for ProcessSpec {
    fn from(config: &StdioConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
        }
    }
}

impl ProcessSpec {
    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Carrier over a child process's standard streams
pub struct ProcessCarrier {
    spec: ProcessSpec,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    pid: AtomicU32,
}

impl ProcessCarrier {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            stdin: tokio::sync::Mutex::new(None),
            shutdown: Mutex::new(None),
            pid: AtomicU32::new(0),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// OS process id once spawned
    pub fn process_id(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

#[async_trait]
impl Carrier for ProcessCarrier {
    fn describe(&self) -> String {
        self.spec.command_line()
    }

    async fn open(&self, sink: InboundSink) -> Result<(), McpError> {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::connection(format!("Failed to spawn '{}': {}", self.spec.program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("Failed to get stdin handle"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("Failed to get stdout handle"))?;
        let stderr = child.stderr.take();

        let pid = child.id().unwrap_or_default();
        self.pid.store(pid, Ordering::SeqCst);
        *self.stdin.lock().await = Some(stdin);
        debug!(pid, command = %self.spec.command_line(), "spawned process");

        let reader_sink = sink.clone();
        let reader = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK_BYTES];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => reader_sink.push_bytes(&chunk[..n]),
                    Err(e) => {
                        reader_sink.failed(&McpError::from(e));
                        break;
                    }
                }
            }
        });

        if let Some(stderr) = stderr {
            let program = self.spec.program.clone();
            tokio::spawn(async move {
                // Diagnostic only; drained as raw bytes until EOF whatever the encoding
                let mut reader = BufReader::new(stderr);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match reader.read_until(b'\n', &mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let text = String::from_utf8_lossy(&line);
                            debug!(target: "toolbridge::stderr", pid, program = %program, "{}", text.trim_end());
                        }
                        Err(e) => {
                            debug!(pid, error = %e, "stderr read failed");
                            break;
                        }
                    }
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let _ = tokio::time::timeout(STDOUT_DRAIN, reader).await;
                    match status {
                        Ok(status) => {
                            info!(pid, %status, "process exited");
                            sink.closed(&format!("process exited with {}", status));
                        }
                        Err(e) => sink.failed(&McpError::transport(format!("waiting for process: {}", e))),
                    }
                }
                _ = shutdown_rx => {
                    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                        Ok(_) => debug!(pid, "process exited after stdin closed"),
                        Err(_) => {
                            warn!(pid, "process ignored stdin close, killing");
                            if let Err(e) = child.kill().await {
                                warn!(pid, error = %e, "failed to kill process");
                            }
                        }
                    }
                    reader.abort();
                    sink.closed("process stopped");
                }
            }
        });

        Ok(())
    }

    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::NotConnected)?;

        stdin.write_all(frame.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), McpError> {
        // Dropping stdin signals EOF to well-behaved servers.
        self.stdin.lock().await.take();
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_stdio_config() {
        let config = StdioConfig::new("node")
            .with_args(["server.js", "--stdio"])
            .with_env("LOG", "debug");
        let spec = ProcessSpec::from(&config);

        assert_eq!(spec.command_line(), "node server.js --stdio");
        assert_eq!(spec.env.get("LOG").map(String::as_str), Some("debug"));
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let carrier = ProcessCarrier::new(ProcessSpec::default());
        let err = carrier.send_raw("{}".into()).await.unwrap_err();
        assert!(matches!(err, McpError::NotConnected));
        assert!(carrier.process_id().is_none());
        assert!(carrier.close().await.is_ok());
    }
}
