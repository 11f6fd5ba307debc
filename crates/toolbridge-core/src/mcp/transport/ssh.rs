//! SSH carrier
//!
//! Opens an authenticated session, execs one remote command and frames its
//! stdout exactly like a local process. Remote stderr is logged only.

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Carrier, InboundSink};
use crate::domain::{SshAuth, SshConfig};
use crate::mcp::error::McpError;

const OUTBOUND_QUEUE: usize = 64;

enum Outbound {
    Frame(Vec<u8>, oneshot::Sender<Result<(), McpError>>),
    Close,
}

/// Accepts the server key, or pins it when a fingerprint is configured
struct HostKeyVerifier {
    host: String,
    expected: Option<String>,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.expected {
            Some(expected) => {
                let expected = expected.trim().trim_start_matches("SHA256:");
                let matches = expected == fingerprint;
                if !matches {
                    warn!(host = %self.host, %fingerprint, "ssh host key does not match pinned fingerprint");
                }
                Ok(matches)
            }
            None => {
                debug!(host = %self.host, %fingerprint, "accepting unpinned ssh host key");
                Ok(true)
            }
        }
    }
}

/// Carrier over the exec channel of an SSH session
pub struct SshCarrier {
    config: SshConfig,
    connect_timeout: Duration,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SshCarrier {
    pub fn new(config: SshConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            outbound: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    async fn establish(&self) -> Result<(Handle<HostKeyVerifier>, Channel<Msg>), McpError> {
        let verifier = HostKeyVerifier {
            host: self.config.host.clone(),
            expected: self.config.host_key_fingerprint.clone(),
        };
        let ssh_config = Arc::new(client::Config::default());
        let address = (self.config.host.as_str(), self.config.port);

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(ssh_config, address, verifier),
        )
        .await
        .map_err(|_| McpError::connection(format!("Timed out connecting to {}", self.describe())))?
        .map_err(|e| McpError::connection(format!("SSH connection to {} failed: {}", self.describe(), e)))?;

        let authenticated = match &self.config.auth {
            SshAuth::Password { password } => {
                handle
                    .authenticate_password(self.config.username.as_str(), password.as_str())
                    .await
            }
            SshAuth::PrivateKey {
                private_key,
                passphrase,
            } => {
                let key = russh_keys::decode_secret_key(private_key, passphrase.as_deref())
                    .map_err(|e| McpError::connection(format!("Invalid private key: {}", e)))?;
                handle
                    .authenticate_publickey(self.config.username.as_str(), Arc::new(key))
                    .await
            }
        }
        .map_err(|e| McpError::connection(format!("SSH authentication error: {}", e)))?;

        if !authenticated {
            return Err(McpError::connection(format!(
                "SSH authentication rejected for {}",
                self.describe()
            )));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| McpError::connection(format!("Failed to open ssh channel: {}", e)))?;
        channel
            .exec(true, self.config.command.as_str())
            .await
            .map_err(|e| McpError::connection(format!("Failed to exec remote command: {}", e)))?;

        Ok((handle, channel))
    }

    async fn pump(
        handle: Handle<HostKeyVerifier>,
        mut channel: Channel<Msg>,
        mut outbound: mpsc::Receiver<Outbound>,
        sink: InboundSink,
        target: String,
    ) {
        let closed_by_peer = loop {
            tokio::select! {
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => sink.push_bytes(&data[..]),
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        for line in String::from_utf8_lossy(&data[..]).lines() {
                            debug!(target: "toolbridge::stderr", remote = %target, "{}", line);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        info!(remote = %target, exit_status, "remote command exited");
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break true,
                    Some(_) => {}
                },
                command = outbound.recv() => match command {
                    Some(Outbound::Frame(bytes, ack)) => {
                        let written = channel
                            .data(&bytes[..])
                            .await
                            .map_err(|e| McpError::transport(format!("ssh write failed: {}", e)));
                        let failed = written.is_err();
                        if let Err(e) = &written {
                            sink.failed(e);
                        }
                        let _ = ack.send(written);
                        if failed {
                            break false;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = channel.eof().await;
                        break false;
                    }
                },
            }
        };

        if closed_by_peer {
            sink.closed("ssh channel closed");
        }
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(remote = %target, error = %e, "ssh disconnect failed");
        }
    }
}

#[async_trait]
impl Carrier for SshCarrier {
    fn describe(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        )
    }

    async fn open(&self, sink: InboundSink) -> Result<(), McpError> {
        let (handle, channel) = self.establish().await?;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        *self.outbound.lock() = Some(tx);
        let task = tokio::spawn(Self::pump(handle, channel, rx, sink, self.describe()));
        *self.task.lock() = Some(task);
        debug!(remote = %self.describe(), command = %self.config.command, "ssh command started");
        Ok(())
    }

    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError> {
        let sender = self.outbound.lock().clone().ok_or(McpError::NotConnected)?;

        let mut bytes = frame.into_bytes();
        bytes.push(b'\n');
        let (ack_tx, ack_rx) = oneshot::channel();
        sender
            .send(Outbound::Frame(bytes, ack_tx))
            .await
            .map_err(|_| McpError::connection("ssh channel closed"))?;
        ack_rx
            .await
            .map_err(|_| McpError::connection("ssh channel closed"))??;
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), McpError> {
        let sender = self.outbound.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(Outbound::Close).await;
        }
        self.task.lock().take();
        Ok(())
    }
}
