//! Minimal newline-framed MCP server on stdio.
//!
//! Exposes two tools, `echo` and `list_processes`, for integration tests.
//! Setting `TEST_TOOL_SERVER_NOISY_STDERR` makes it write invalid UTF-8 to
//! stderr before handling each line.

use anyhow::Result;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use toolbridge_core::mcp::protocol::{McpResponse, McpRpcError, RequestId, methods};
use toolbridge_core::mcp::MCP_PROTOCOL_VERSION;

/// When set, every inbound line is answered with invalid UTF-8 on stderr first
const NOISY_STDERR_ENV: &str = "TEST_TOOL_SERVER_NOISY_STDERR";

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Echo back the given message",
                "inputSchema": {
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }
            },
            {
                "name": "list_processes",
                "description": "List processes visible to the server",
                "inputSchema": { "type": "object", "properties": {} }
            }
        ]
    })
}

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }], "isError": false })
}

fn list_processes() -> String {
    let own = std::process::id();
    let mut lines = vec![format!("pid={} name=test_tool_server", own)];

    if let Ok(entries) = std::fs::read_dir("/proc") {
        let mut others: Vec<(u32, String)> = entries
            .flatten()
            .filter_map(|entry| {
                let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
                let name = std::fs::read_to_string(entry.path().join("comm")).ok()?;
                Some((pid, name.trim().to_string()))
            })
            .filter(|(pid, _)| *pid != own)
            .collect();
        others.sort();
        lines.extend(
            others
                .into_iter()
                .take(50)
                .map(|(pid, name)| format!("pid={} name={}", pid, name)),
        );
    }
    lines.join("\n")
}

fn call_tool(params: Option<&Value>) -> Result<Value, McpRpcError> {
    let params = params.ok_or_else(McpRpcError::invalid_params)?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(McpRpcError::invalid_params)?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    match name {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    McpRpcError::new(
                        McpRpcError::INVALID_PARAMS,
                        "echo requires a string 'message'",
                    )
                })?;
            Ok(text_result(format!("Echo: {}", message)))
        }
        "list_processes" => Ok(text_result(list_processes())),
        other => Err(McpRpcError::new(
            McpRpcError::INVALID_PARAMS,
            format!("Unknown tool: {}", other),
        )),
    }
}

fn handle(message: &Value) -> Option<McpResponse> {
    let id = message.get("id").filter(|id| !id.is_null()).cloned();
    let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = message.get("params");

    // Notifications get no reply
    let id: RequestId = serde_json::from_value(id?).ok()?;

    let outcome = match method {
        methods::INITIALIZE => Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "test-tool-server", "version": env!("CARGO_PKG_VERSION") }
        })),
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => Ok(tool_list()),
        methods::TOOLS_CALL => call_tool(params),
        _ => Err(McpRpcError::method_not_found()),
    };

    Some(match outcome {
        Ok(result) => McpResponse::success(id, result),
        Err(error) => McpResponse::error(id, error),
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let noisy = std::env::var_os(NOISY_STDERR_ENV).is_some();
    eprintln!("test_tool_server ready (pid {})", std::process::id());

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if noisy {
            stderr.write_all(b"\xff\xfe not utf-8 \xc3\n").await?;
            stderr.flush().await?;
        }

        let reply = match serde_json::from_str::<Value>(&line) {
            Ok(message) => match handle(&message) {
                Some(response) => serde_json::to_value(response)?,
                None => continue,
            },
            Err(_) => json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": McpRpcError::parse_error(),
            }),
        };

        let mut frame = serde_json::to_string(&reply)?;
        frame.push('\n');
        stdout.write_all(frame.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
