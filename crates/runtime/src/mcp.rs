//! MCP client over the streamable HTTP transport, using the rmcp SDK.
//!
//! # Example
//!
//! ```no_run
//! use runtime::mcp::McpClient;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), runtime::mcp::McpError> {
//! let client = McpClient::connect("http://localhost:8931/mcp", Duration::from_secs(30)).await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use rmcp::{
    ServiceExt,
    model::{CallToolRequestParams, CallToolResult, Tool},
    service::{RoleClient, RunningService},
    transport::StreamableHttpClientTransport,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors talking to an MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("could not open MCP session with {url}: {message}")]
    Connect { url: String, message: String },

    #[error("MCP request failed: {0}")]
    Request(String),

    #[error("MCP request timed out after {0:?}")]
    Timeout(Duration),
}

/// What a tool call returned.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutput {
    pub text: String,
    /// The server flagged the call as failed.
    pub is_error: bool,
}

/// An MCP client connected to a server over HTTP.
pub struct McpClient {
    service: RunningService<RoleClient, ()>,
    timeout: Duration,
}

impl McpClient {
    /// Open a session with the server at `url` (initialize handshake).
    ///
    /// `timeout` bounds the handshake and every later request.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, McpError> {
        let transport = StreamableHttpClientTransport::from_uri(url);
        let service = with_timeout(timeout, ().serve(transport))
            .await?
            .map_err(|e| McpError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        debug!(url, "mcp session initialized");

        Ok(Self { service, timeout })
    }

    /// Name the server reported during the handshake.
    pub fn server_name(&self) -> Option<&str> {
        self.service
            .peer_info()
            .map(|info| info.server_info.name.as_str())
    }

    /// List every tool, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        with_timeout(self.timeout, self.service.list_all_tools())
            .await?
            .map_err(|e| McpError::Request(e.to_string()))
    }

    /// Call a tool with the given name and arguments.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallOutput, McpError> {
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(arguments),
            meta: None,
            task: None,
        };

        let result = with_timeout(self.timeout, self.service.call_tool(params))
            .await?
            .map_err(|e| McpError::Request(e.to_string()))?;

        Ok(CallOutput {
            text: result_text(&result),
            is_error: result.is_error.unwrap_or(false),
        })
    }

    /// End the session. Never fails.
    pub async fn close(self) {
        if let Err(e) = self.service.cancel().await {
            debug!("mcp client task ended abnormally: {e}");
        }
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = T>) -> Result<T, McpError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| McpError::Timeout(limit))
}

/// Text blocks joined by newlines; structured content when there is no text.
fn result_text(result: &CallToolResult) -> String {
    let texts: Vec<String> = result
        .content
        .iter()
        .filter_map(|content| serde_json::to_value(content).ok())
        .filter_map(|value| value.get("text").and_then(Value::as_str).map(str::to_string))
        .collect();

    if texts.is_empty() {
        if let Some(structured) = &result.structured_content {
            return structured.to_string();
        }
    }
    texts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_result(value: Value) -> CallToolResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_blocks_are_joined() {
        let result = call_result(json!({
            "content": [
                {"type": "text", "text": "Navigated to https://example.com"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "text", "text": "- Page Title: Example Domain"}
            ]
        }));
        assert_eq!(
            result_text(&result),
            "Navigated to https://example.com\n- Page Title: Example Domain"
        );
    }

    #[test]
    fn structured_content_used_without_text() {
        let result = call_result(json!({
            "content": [],
            "structuredContent": {"title": "Example Domain"}
        }));
        assert_eq!(result_text(&result), r#"{"title":"Example Domain"}"#);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let err = McpClient::connect("http://127.0.0.1:1/mcp", Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Connect { .. }), "{err}");
    }
}
