//! Carrier configuration
//!
//! Each server carries exactly one configuration variant; the variant is the
//! single source of truth for its transport kind.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// The four supported carriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Ssh,
    Http,
    Docker,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Ssh => "ssh",
            Self::Http => "http",
            Self::Docker => "docker",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged carrier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Ssh(SshConfig),
    Http(HttpConfig),
    Docker(DockerConfig),
}

impl TransportConfig {
    /// Kind implied by the populated variant
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Ssh(_) => TransportKind::Ssh,
            Self::Http(_) => TransportKind::Http,
            Self::Docker(_) => TransportKind::Docker,
        }
    }
}

/// Locally spawned process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Remote command over an SSH session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    /// Remote command whose stdin/stdout carry the protocol
    pub command: String,
    /// Expected SHA-256 host key fingerprint; any key is accepted when unset
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// SSH credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SshAuth {
    Password {
        password: String,
    },
    PrivateKey {
        /// OpenSSH or PEM encoded key material
        private_key: String,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f.write_str("SshAuth::Password(<redacted>)"),
            Self::PrivateKey { passphrase, .. } => f
                .debug_struct("SshAuth::PrivateKey")
                .field("private_key", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
        }
    }
}

/// HTTP endpoint, either request/response POST or a WebSocket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub use_websocket: bool,
}

/// Process running in a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub image: String,
    /// Existing container to `exec` into instead of starting a new one
    #[serde(default)]
    pub container: Option<String>,
    /// Command line, split with shell word rules
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}
