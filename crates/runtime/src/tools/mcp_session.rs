//! MCP-backed tool session.

use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ToolConnector, ToolError, ToolSession, preview};
use crate::host::{LaunchSpec, ProcessError, Readiness, ToolHostProcess};
use crate::mcp::{McpClient, McpError};
use crate::model::{ToolDescriptor, ToolInvocationRequest, ToolInvocationResult};
use crate::{Error, Result};

/// Default timeout for each MCP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Launches the tool host and opens MCP sessions against it.
#[derive(Debug, Clone)]
pub struct McpConnector {
    launch: LaunchSpec,
    readiness: Readiness,
    request_timeout: Duration,
}

impl McpConnector {
    pub fn new(launch: LaunchSpec) -> Self {
        Self {
            launch,
            readiness: Readiness::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Timeout for each MCP request, tool calls included.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.launch
    }
}

impl ToolConnector for McpConnector {
    type Session = McpToolSession;

    async fn connect(&self) -> Result<McpToolSession> {
        self.launch.validate()?;

        let mut process = ToolHostProcess::start(&self.launch)?;
        if let Err(e) = process.await_ready(&self.readiness).await {
            process.stop().await;
            return Err(match e {
                ProcessError::NotReady { .. } => Error::Discovery(e.to_string()),
                e => e.into(),
            });
        }

        let url = self.launch.url.as_str();
        let client = match McpClient::connect(url, self.request_timeout).await {
            Ok(client) => client,
            Err(first) => {
                warn!("tool session did not open ({first}), retrying once");
                let retried = match process.check_alive() {
                    Ok(()) => {
                        sleep(self.readiness.retry_pause()).await;
                        McpClient::connect(url, self.request_timeout)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e.to_string()),
                };
                match retried {
                    Ok(client) => client,
                    Err(reason) => {
                        process.stop().await;
                        return Err(Error::Discovery(format!(
                            "could not open tool session at {url}: {reason}"
                        )));
                    }
                }
            }
        };

        info!(
            url,
            server = client.server_name().unwrap_or("unknown"),
            "tool session open"
        );

        Ok(McpToolSession {
            process,
            client,
            discovered: false,
        })
    }
}

/// A tool session over MCP, owning the host process it talks to.
pub struct McpToolSession {
    process: ToolHostProcess,
    client: McpClient,
    discovered: bool,
}

impl McpToolSession {
    /// Name the server reported during the handshake.
    pub fn server_name(&self) -> Option<&str> {
        self.client.server_name()
    }
}

impl ToolSession for McpToolSession {
    async fn discover_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        if self.discovered {
            return Err(Error::InvalidState(
                "tools were already discovered on this session".into(),
            ));
        }

        let tools = self
            .client
            .list_tools()
            .await
            .map_err(|e| Error::Discovery(format!("listing tools failed: {e}")))?;
        self.discovered = true;

        if tools.is_empty() {
            return Err(Error::Discovery("tool host offers no tools".into()));
        }

        let descriptors: Vec<ToolDescriptor> = tools
            .iter()
            .map(|tool| {
                ToolDescriptor::from_input_schema(
                    tool.name.to_string(),
                    tool.description.as_deref().unwrap_or_default(),
                    &tool.input_schema,
                )
            })
            .collect();
        info!(count = descriptors.len(), "discovered tools");
        Ok(descriptors)
    }

    async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
        debug!(tool = %request.tool_name, id = %request.id, "invoking tool");

        let outcome = self
            .client
            .call_tool(&request.tool_name, request.arguments.clone())
            .await;

        match outcome {
            Ok(output) if output.is_error => {
                warn!(tool = %request.tool_name, "tool reported an error: {}", preview(&output.text));
                ToolInvocationResult::failure(request, ToolError::Host(output.text))
            }
            Ok(output) => {
                debug!(tool = %request.tool_name, output = %preview(&output.text), "tool finished");
                ToolInvocationResult::success(request, Value::String(output.text))
            }
            Err(McpError::Timeout(limit)) => {
                warn!(tool = %request.tool_name, "tool call timed out");
                ToolInvocationResult::failure(request, ToolError::Timeout(limit.as_millis() as u64))
            }
            Err(e) => {
                warn!(tool = %request.tool_name, "tool call failed: {e}");
                ToolInvocationResult::failure(request, ToolError::Execution(e.to_string()))
            }
        }
    }

    async fn close(self) {
        let Self {
            mut process,
            client,
            ..
        } = self;
        client.close().await;
        process.stop().await;
        info!("tool session closed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::ToolOutcome;
    use serde_json::{Map, json};
    use std::path::{Path, PathBuf};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Answers MCP JSON-RPC requests the way a streamable HTTP server does.
    struct FakeMcpServer {
        tools: Value,
        call_result: Value,
    }

    impl Respond for FakeMcpServer {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
                return ResponseTemplate::new(400);
            };
            let Some(id) = body.get("id").cloned() else {
                // notification
                return ResponseTemplate::new(202);
            };

            let result = match body["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": body["params"]["protocolVersion"],
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "Playwright", "version": "0.0.1"}
                }),
                Some("tools/list") => json!({"tools": self.tools}),
                Some("tools/call") => self.call_result.clone(),
                _ => {
                    return ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"}
                    }));
                }
            };

            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "session-1")
                .set_body_json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }
    }

    async fn mcp_server(tools: Value, call_result: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(FakeMcpServer { tools, call_result })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    fn navigate_tool() -> Value {
        json!([{
            "name": "browser_navigate",
            "description": "Navigate to a URL",
            "inputSchema": {"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}
        }])
    }

    fn text_result(text: &str, is_error: bool) -> Value {
        json!({"content": [{"type": "text", "text": text}], "isError": is_error})
    }

    fn probing(launch: LaunchSpec) -> McpConnector {
        McpConnector::new(launch).readiness(Readiness::Probe {
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        })
    }

    fn connector(url: String) -> McpConnector {
        probing(LaunchSpec::new("sleep", url).with_args(["30"]))
    }

    fn marker_path() -> PathBuf {
        std::env::temp_dir().join(format!("helmsman-term-{}", uuid::Uuid::new_v4()))
    }

    /// A host that records SIGTERM by creating `marker`.
    fn term_recording_host(url: String, marker: &Path) -> LaunchSpec {
        let script = format!(
            "trap 'touch {}; exit 0' TERM; while :; do sleep 0.05; done",
            marker.display()
        );
        LaunchSpec::new("sh", url).with_args(["-c".to_string(), script])
    }

    async fn appears(path: &Path) -> bool {
        for _ in 0..100 {
            if path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn discovers_once_and_maps_results() {
        let server = mcp_server(navigate_tool(), text_result("Navigated", false)).await;

        let mut session = connector(format!("{}/mcp", server.uri()))
            .connect()
            .await
            .unwrap();
        assert_eq!(session.server_name(), Some("Playwright"));

        let tools = session.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert!(tools[0].parameter("url").unwrap().required);

        let again = session.discover_tools().await.unwrap_err();
        assert!(matches!(again, Error::InvalidState(_)));

        let mut args = Map::new();
        args.insert("url".into(), json!("https://example.com"));
        let request = ToolInvocationRequest::new("call_0", "browser_navigate", args);
        let result = session.invoke(&request).await;
        assert_eq!(result.call_id, "call_0");
        assert_eq!(
            result.outcome,
            ToolOutcome::Success {
                payload: json!("Navigated")
            }
        );

        session.close().await;
    }

    #[tokio::test]
    async fn host_side_error_becomes_failed_result() {
        let server = mcp_server(navigate_tool(), text_result("No element matches", true)).await;

        let session = connector(format!("{}/mcp", server.uri()))
            .connect()
            .await
            .unwrap();

        let request = ToolInvocationRequest::new("call_0", "browser_click", Map::new());
        let result = session.invoke(&request).await;
        assert_eq!(
            result.outcome,
            ToolOutcome::Failure {
                error: ToolError::Host("No element matches".into())
            }
        );

        session.close().await;
    }

    #[tokio::test]
    async fn empty_tool_list_is_a_discovery_error() {
        let server = mcp_server(json!([]), text_result("", false)).await;

        let mut session = connector(format!("{}/mcp", server.uri()))
            .connect()
            .await
            .unwrap();
        let err = session.discover_tools().await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)), "{err}");
        session.close().await;
    }

    #[tokio::test]
    async fn unreachable_host_fails_after_one_retry() {
        let launch = LaunchSpec::new("sleep", "http://127.0.0.1:1/mcp").with_args(["30"]);
        let connector =
            McpConnector::new(launch).readiness(Readiness::Delay(Duration::from_millis(10)));

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Discovery(_)), "{err}");
    }

    #[tokio::test]
    async fn host_that_never_answers_is_a_discovery_error() {
        let launch = LaunchSpec::new("sleep", "http://127.0.0.1:1/mcp").with_args(["30"]);
        let connector = McpConnector::new(launch).readiness(Readiness::Probe {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
        });

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Discovery(_)), "{err}");
    }

    #[tokio::test]
    async fn host_that_exits_during_startup_is_a_process_error() {
        let launch = LaunchSpec::new("sh", "http://127.0.0.1:1/mcp").with_args(["-c", "exit 3"]);
        let connector =
            McpConnector::new(launch).readiness(Readiness::Delay(Duration::from_millis(300)));

        let err = connector.connect().await.err().unwrap();
        assert!(
            matches!(err, Error::Process(ProcessError::Exited { .. })),
            "{err}"
        );
    }

    #[tokio::test]
    async fn invalid_launch_spec_is_a_config_error() {
        let connector = McpConnector::new(LaunchSpec::new("", "http://127.0.0.1:1/mcp"));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[tokio::test]
    async fn close_sends_sigterm_to_the_host() {
        let server = mcp_server(navigate_tool(), text_result("ok", false)).await;
        let marker = marker_path();
        let launch = term_recording_host(format!("{}/mcp", server.uri()), &marker);

        let session = probing(launch).connect().await.unwrap();
        session.close().await;

        assert!(marker.exists(), "host did not see SIGTERM on close");
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn dropping_a_live_session_sends_sigterm_to_the_host() {
        let server = mcp_server(navigate_tool(), text_result("ok", false)).await;
        let marker = marker_path();
        let launch = term_recording_host(format!("{}/mcp", server.uri()), &marker);

        let session = probing(launch).connect().await.unwrap();
        drop(session);

        assert!(appears(&marker).await, "host did not see SIGTERM on drop");
        let _ = std::fs::remove_file(&marker);
    }
}
