//! Helmsman runtime: drives a reasoning service through a browser tool host.
//!
//! The runtime connects a large-language-model backend to an external tool
//! host that speaks MCP over HTTP, and runs the multi-turn loop in which the
//! model requests tool calls, the runtime executes them and returns results,
//! until the model produces a final answer.
//!
//! # Overview
//!
//! - **ToolHostProcess**: starts the tool host, waits for it, and guarantees
//!   it is stopped (explicitly, on drop, or when this process dies).
//! - **ToolSession**: one connection to the tool host; discovers tools and
//!   invokes them. [`McpToolSession`] is the MCP implementation, built on
//!   the [`mcp`] client.
//! - **SchemaTranslator**: turns discovered tools into function declarations.
//! - **ReasoningAdapter**: one reasoning service ([`GeminiAdapter`],
//!   [`OpenAiAdapter`]), declaring whether it batches tool calls and who holds
//!   the conversation.
//! - **ConversationEngine**: the request loop.
//! - **Agent**: ties the above together; one fresh tool session per task.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{Agent, AgentOptions, GeminiAdapter, LaunchSpec, McpConnector};
//!
//! # async fn example() -> runtime::Result<()> {
//! let launch = LaunchSpec::new("docker", "http://localhost:8931/mcp").with_args([
//!     "run", "--rm", "-p", "8931:8931", "mcr.microsoft.com/playwright/mcp",
//!     "--port", "8931", "--host", "0.0.0.0",
//! ]);
//! let adapter = GeminiAdapter::builder("api-key", "gemini-2.5-flash")
//!     .system("You operate a web browser.")
//!     .build();
//!
//! let mut agent = Agent::new(adapter, McpConnector::new(launch), AgentOptions::default());
//! let answer = agent.run_task("What is the title of example.com?").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

mod backend;
mod engine;
mod error;
pub mod host;
pub mod mcp;
pub mod model;
mod schema;
mod session;
pub mod tools;

pub use backend::{
    BackendAdapter, Capabilities, GeminiAdapter, GeminiAdapterBuilder, HistoryShape,
    OpenAiAdapter, OpenAiAdapterBuilder, ProviderKind, ReasoningAdapter, TurnInput, TurnRequest,
    TurnResponse,
};
pub use engine::{ConversationEngine, DEFAULT_MAX_TURNS, EngineState};
pub use error::{Error, Result};
pub use host::{HostState, LaunchSpec, ProcessError, Readiness, ToolHostProcess};
pub use model::{
    ConversationHistory, ConversationTurn, ModelError, ParameterSpec, Part, Role, ToolDescriptor,
    ToolInvocationRequest, ToolInvocationResult, ToolOutcome,
};
pub use schema::{FunctionDeclaration, ProviderToolSchema, SchemaTranslator};
pub use session::{Agent, AgentOptions, AgentSession, SessionId};
pub use tools::{McpConnector, McpToolSession, ToolConnector, ToolError, ToolSession};
