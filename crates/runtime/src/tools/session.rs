//! Tool session traits.

use crate::Result;
use crate::model::{ToolDescriptor, ToolInvocationRequest, ToolInvocationResult};
use std::future::Future;

/// A live connection to a tool host.
///
/// This is the boundary between the conversation loop and side effects.
pub trait ToolSession: Send + Sync {
    /// Fetch the tools the host offers.
    ///
    /// Succeeds at most once per session. An empty tool list is an error.
    fn discover_tools(&mut self) -> impl Future<Output = Result<Vec<ToolDescriptor>>> + Send;

    /// Execute a tool call.
    ///
    /// Never fails: host or transport problems come back as a failed result
    /// carrying the request's id and tool name.
    fn invoke(
        &self,
        request: &ToolInvocationRequest,
    ) -> impl Future<Output = ToolInvocationResult> + Send;

    /// Close the session and release the host behind it. Never fails.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens tool sessions.
pub trait ToolConnector: Send + Sync {
    type Session: ToolSession;

    /// Start the tool host if needed and open a session against it.
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}
