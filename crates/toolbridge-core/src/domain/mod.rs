//! Domain records shared by the pool, the orchestrator and the stores

pub mod execution;
pub mod ids;
pub mod server;
pub mod tool;
pub mod transport;

pub use execution::{Execution, ExecutionFailure, ExecutionFilter, ExecutionStatus, TransitionError};
pub use ids::{ExecutionId, ServerId};
pub use server::{ConnectionStatus, ServerDescriptor, ServerStatus};
pub use tool::ToolDescriptor;
pub use transport::{
    DockerConfig, HttpConfig, SshAuth, SshConfig, StdioConfig, TransportConfig, TransportKind,
};
