//! WebSocket carrier
//!
//! Full-duplex. Inbound frames go through the same newline framing as the
//! process carriers; outbound messages are sent as newline-terminated text
//! frames.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::{Carrier, InboundSink};
use crate::domain::HttpConfig;
use crate::mcp::error::McpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Carrier over a client WebSocket
pub struct WebSocketCarrier {
    url: String,
    headers: HashMap<String, String>,
    connect_timeout: Duration,
    writer: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketCarrier {
    pub fn new(config: &HttpConfig, connect_timeout: Duration) -> Self {
        Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            connect_timeout,
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    async fn read_loop(mut stream: SplitStream<WsStream>, sink: InboundSink) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => sink.push_frame(text.as_str().as_bytes()),
                Ok(Message::Binary(data)) => sink.push_frame(&data[..]),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("websocket closed by server: {} {}", f.code, f.reason.as_str()))
                        .unwrap_or_else(|| "websocket closed by server".to_string());
                    sink.closed(&reason);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    sink.failed(&McpError::connection(format!("websocket error: {}", e)));
                    return;
                }
            }
        }
        sink.closed("websocket stream ended");
    }
}

#[async_trait]
impl Carrier for WebSocketCarrier {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn open(&self, sink: InboundSink) -> Result<(), McpError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| McpError::connection(format!("Invalid websocket url '{}': {}", self.url, e)))?;
        for (key, value) in &self.headers {
            match (HeaderName::try_from(key.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(val)) => {
                    request.headers_mut().insert(name, val);
                }
                _ => warn!(header = %key, "skipping invalid websocket header"),
            }
        }

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| McpError::connection(format!("Timed out connecting to {}", self.url)))?
            .map_err(|e| McpError::connection(format!("Failed to connect to {}: {}", self.url, e)))?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock() = Some(tokio::spawn(Self::read_loop(reader, sink)));
        Ok(())
    }

    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(McpError::NotConnected)?;

        let mut text = frame;
        text.push('\n');
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| McpError::transport(format!("websocket send failed: {}", e)))?;
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), McpError> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(url = %self.url, error = %e, "websocket close handshake failed");
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}
