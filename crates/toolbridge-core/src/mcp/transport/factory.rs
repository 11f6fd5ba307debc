//! Transport construction keyed on the configuration variant

use std::sync::Arc;

use super::docker::docker_process_spec;
use super::http::HttpCarrier;
use super::session::SessionTransport;
use super::ssh::SshCarrier;
use super::stdio::{ProcessCarrier, ProcessSpec};
use super::websocket::WebSocketCarrier;
use super::{Transport, TransportOptions};
use crate::domain::{ServerDescriptor, TransportConfig};
use crate::mcp::error::McpError;

/// Builds a fresh, unconnected transport for a server
pub trait TransportFactory: Send + Sync {
    fn create(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError>;
}

/// Factory for the built-in carriers
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    options: TransportOptions,
}

impl DefaultTransportFactory {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, server: &ServerDescriptor) -> Result<Arc<dyn Transport>, McpError> {
        let kind = server.transport_kind();
        let label = server.name.as_str();
        let options = &self.options;

        let transport: Arc<dyn Transport> = match &server.transport {
            TransportConfig::Stdio(config) => Arc::new(SessionTransport::new(
                kind,
                label,
                ProcessCarrier::new(ProcessSpec::from(config)),
                options,
            )),
            TransportConfig::Docker(config) => Arc::new(SessionTransport::new(
                kind,
                label,
                ProcessCarrier::new(docker_process_spec(config, &options.docker_binary)?),
                options,
            )),
            TransportConfig::Ssh(config) => Arc::new(SessionTransport::new(
                kind,
                label,
                SshCarrier::new(config.clone(), options.connect_timeout),
                options,
            )),
            TransportConfig::Http(config) if config.use_websocket => Arc::new(SessionTransport::new(
                kind,
                label,
                WebSocketCarrier::new(config, options.connect_timeout),
                options,
            )),
            TransportConfig::Http(config) => Arc::new(SessionTransport::new(
                kind,
                label,
                HttpCarrier::new(config, options.connect_timeout)?,
                options,
            )),
        };
        Ok(transport)
    }
}
