//! Discovered tool records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::ServerId;
use crate::mcp::types::McpTool;

/// A tool exposed by a server, as of one discovery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server_id: ServerId,
    /// Unique per server
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
    pub enabled: bool,
    /// Discovery run that produced this record, starting at 1
    pub version: u32,
    pub discovered_at: DateTime<Utc>,
}

impl ToolDescriptor {
    pub fn from_listing(server_id: ServerId, tool: McpTool, version: u32) -> Self {
        Self {
            server_id,
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            enabled: true,
            version,
            discovered_at: Utc::now(),
        }
    }
}
