//! WebSocket carrier against a local tokio-tungstenite server

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use toolbridge_core::domain::{HttpConfig, TransportKind};
use toolbridge_core::mcp::MCP_PROTOCOL_VERSION;
use toolbridge_core::mcp::protocol::methods;
use toolbridge_core::mcp::transport::{SessionTransport, TransportOptions, WebSocketCarrier};
use toolbridge_core::{ConnectionStatus, McpError, Transport};

/// How the server frames its replies
#[derive(Debug, Clone, Copy, PartialEq)]
enum Framing {
    /// One text frame per message, no trailing newline
    Unterminated,
    /// Each reply split across two text frames, newline at the end
    Split,
    /// Newline-terminated binary frames
    Binary,
    /// Like `Unterminated`, but `tools/call` makes the server close the socket
    CloseOnCall,
}

async fn spawn_server(framing: Framing) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, framing));
        }
    });
    format!("ws://{}", addr)
}

fn reply_for(request: &Value) -> Value {
    let result = match request["method"].as_str().unwrap_or_default() {
        methods::INITIALIZE => json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "serverInfo": { "name": "ws-server", "version": "0.3.0" }
        }),
        methods::PING => json!({}),
        _ => json!({ "echo": request["params"] }),
    };
    json!({ "jsonrpc": "2.0", "id": request["id"], "result": result })
}

async fn serve(stream: TcpStream, framing: Framing) {
    let Ok(socket) = accept_async(stream).await else {
        return;
    };
    let (mut writer, mut reader) = socket.split();

    while let Some(Ok(frame)) = reader.next().await {
        let Message::Text(text) = frame else { continue };
        for line in text.as_str().lines().filter(|l| !l.trim().is_empty()) {
            let request: Value = serde_json::from_str(line).unwrap();
            if request.get("id").is_none() {
                continue;
            }
            if framing == Framing::CloseOnCall && request["method"] == methods::TOOLS_CALL {
                let _ = writer.send(Message::Close(None)).await;
                return;
            }

            let reply = reply_for(&request).to_string();
            let sent = match framing {
                Framing::Unterminated | Framing::CloseOnCall => {
                    let progress = json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/progress",
                        "params": { "progress": 1 }
                    });
                    let _ = writer.send(Message::Text(progress.to_string().into())).await;
                    writer.send(Message::Text(reply.into())).await
                }
                Framing::Split => {
                    let (head, tail) = reply.split_at(reply.len() / 2);
                    let _ = writer.send(Message::Text(head.to_string().into())).await;
                    writer.send(Message::Text(format!("{}\n", tail).into())).await
                }
                Framing::Binary => {
                    let bytes = format!("{}\n", reply).into_bytes();
                    writer.send(Message::Binary(bytes.into())).await
                }
            };
            if sent.is_err() {
                return;
            }
        }
    }
}

fn ws_transport(url: String) -> SessionTransport<WebSocketCarrier> {
    let config = HttpConfig {
        url,
        headers: HashMap::new(),
        use_websocket: true,
    };
    SessionTransport::new(
        TransportKind::Http,
        "ws-server",
        WebSocketCarrier::new(&config, Duration::from_secs(2)),
        &TransportOptions::default(),
    )
}

#[tokio::test]
async fn test_unterminated_frames_are_dispatched_whole() {
    let url = spawn_server(Framing::Unterminated).await;
    let transport = ws_transport(url);
    let mut notifications = transport.notifications();

    let info = transport.connect().await.unwrap();
    assert_eq!(info.server_info.name, "ws-server");

    let result = transport
        .call(methods::TOOLS_CALL, Some(json!({ "name": "echo" })))
        .await
        .unwrap();
    assert_eq!(result, json!({ "echo": { "name": "echo" } }));

    let progress = notifications.recv().await.unwrap();
    assert_eq!(progress.method.as_deref(), Some("notifications/progress"));

    transport.disconnect().await.unwrap();
    assert_eq!(transport.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_message_split_across_frames() {
    let url = spawn_server(Framing::Split).await;
    let transport = ws_transport(url);
    transport.connect().await.unwrap();

    for _ in 0..3 {
        assert_eq!(transport.call(methods::PING, None).await.unwrap(), json!({}));
    }
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_binary_frames_round_trip() {
    let url = spawn_server(Framing::Binary).await;
    let transport = ws_transport(url);
    transport.connect().await.unwrap();

    let result = transport
        .call(methods::TOOLS_CALL, Some(json!({ "name": "list" })))
        .await
        .unwrap();
    assert_eq!(result["echo"]["name"], "list");
}

#[tokio::test]
async fn test_server_close_disconnects_and_rejects_pending() {
    let url = spawn_server(Framing::CloseOnCall).await;
    let transport = Arc::new(ws_transport(url));
    transport.connect().await.unwrap();
    let mut status = transport.watch_status();

    let err = transport
        .call(methods::TOOLS_CALL, Some(json!({ "name": "echo" })))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Connection { .. }));

    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();
    assert_eq!(transport.pending_requests(), 0);
    assert!(matches!(
        transport.call(methods::PING, None).await,
        Err(McpError::NotConnected)
    ));
}

#[tokio::test]
async fn test_refused_socket_fails_connect() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = ws_transport(format!("ws://{}", addr));
    let err = transport.connect().await.unwrap_err();

    assert!(matches!(err, McpError::Connection { .. }));
    assert_eq!(transport.status(), ConnectionStatus::Error);
}
