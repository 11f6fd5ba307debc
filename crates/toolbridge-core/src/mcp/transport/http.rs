//! Plain HTTP carrier
//!
//! Half-duplex: each outbound message is POSTed and the response body is
//! parsed in-line. Bodies may be a single JSON document or a short
//! `text/event-stream` whose `data:` lines carry the messages.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Carrier, InboundSink};
use crate::domain::HttpConfig;
use crate::mcp::error::McpError;

const SESSION_HEADER: &str = "mcp-session-id";

/// Carrier that POSTs each frame to one endpoint
pub struct HttpCarrier {
    client: Client,
    url: String,
    session_id: RwLock<Option<String>>,
    sink: Mutex<Option<InboundSink>>,
}

impl HttpCarrier {
    pub fn new(config: &HttpConfig, connect_timeout: Duration) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        header_map.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        for (key, value) in &config.headers {
            match (HeaderName::try_from(key.as_str()), HeaderValue::try_from(value.as_str())) {
                (Ok(name), Ok(val)) => {
                    header_map.insert(name, val);
                }
                _ => warn!(header = %key, "skipping invalid HTTP header"),
            }
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(header_map)
            .build()
            .map_err(|e| McpError::connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            session_id: RwLock::new(None),
            sink: Mutex::new(None),
        })
    }

    /// Session id assigned by the server, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn fail(&self, error: &McpError) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.failed(error);
        }
    }
}

#[async_trait]
impl Carrier for HttpCarrier {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn open(&self, sink: InboundSink) -> Result<(), McpError> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    async fn send_raw(&self, frame: String) -> Result<Vec<String>, McpError> {
        let mut request = self.client.post(&self.url).body(frame);
        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let error = McpError::connection(format!("HTTP request to {} failed: {}", self.url, e));
                self.fail(&error);
                return Err(error);
            }
        };

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(session_id) {
                debug!(url = %self.url, session_id, "server assigned session");
                *current = Some(session_id.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(url = %self.url, %status, "request rejected");
            return Err(McpError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let error = McpError::transport(format!("Failed to read HTTP response: {}", e));
                self.fail(&error);
                return Err(error);
            }
        };

        if is_event_stream {
            Ok(parse_sse_messages(&body))
        } else if body.trim().is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![body])
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.sink.lock().take();
        let Some(session_id) = self.session_id.write().take() else {
            return Ok(());
        };

        match self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, session_id)
            .send()
            .await
        {
            Ok(response) => debug!(url = %self.url, status = %response.status(), "session terminated"),
            Err(e) => debug!(url = %self.url, error = %e, "session termination failed"),
        }
        Ok(())
    }
}

/// Extract the `data:` payload of every event in an SSE body
fn parse_sse_messages(body: &str) -> Vec<String> {
    let normalized = body.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
                .collect();
            if data.is_empty() {
                None
            } else {
                Some(data.join("\n"))
            }
        })
        .filter(|data| !data.is_empty())
        .collect()
}
