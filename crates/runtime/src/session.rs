//! Agent and per-task sessions.

use crate::backend::ReasoningAdapter;
use crate::engine::ConversationEngine;
use crate::model::{ConversationHistory, ToolDescriptor};
use crate::tools::{ToolConnector, ToolSession};
use crate::{Error, Result};
use std::future::Future;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

/// Identifies one agent session in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an [`Agent`] runs its tasks.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Keep the conversation across tasks instead of starting fresh.
    pub carry_history: bool,
    pub engine: ConversationEngine,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            carry_history: true,
            engine: ConversationEngine::default(),
        }
    }
}

/// A tool session opened for one task.
pub struct AgentSession<S> {
    id: SessionId,
    tools: S,
}

impl<S: ToolSession> AgentSession<S> {
    pub async fn open<C>(connector: &C) -> Result<Self>
    where
        C: ToolConnector<Session = S>,
    {
        let id = SessionId::new();
        let tools = connector
            .connect()
            .instrument(info_span!("session", %id))
            .await?;
        Ok(Self { id, tools })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn tools(&self) -> &S {
        &self.tools
    }

    pub async fn close(self) {
        self.tools.close().await;
    }
}

/// A reasoning adapter paired with a way to reach the tool host.
///
/// Tools are discovered once; every task then runs on a fresh tool session
/// that is closed whether the task succeeds or fails.
pub struct Agent<A, C> {
    adapter: A,
    connector: C,
    options: AgentOptions,
    history: ConversationHistory,
    tools: Vec<ToolDescriptor>,
}

impl<A, C> Agent<A, C>
where
    A: ReasoningAdapter,
    C: ToolConnector,
{
    pub fn new(adapter: A, connector: C, options: AgentOptions) -> Self {
        Self {
            adapter,
            connector,
            options,
            history: ConversationHistory::new(),
            tools: Vec::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Tools discovered by [`prepare`](Self::prepare).
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Discover the tool host's tools and build the adapter's catalog.
    ///
    /// Uses a short-lived session of its own. Runs once; later calls return
    /// the cached tools.
    pub async fn prepare(&mut self) -> Result<&[ToolDescriptor]> {
        if self.adapter.has_catalog() {
            return Ok(&self.tools);
        }

        let id = SessionId::new();
        let span = info_span!("discovery", %id);
        let mut session = self.connector.connect().instrument(span.clone()).await?;
        let discovered = session.discover_tools().instrument(span.clone()).await;
        session.close().instrument(span).await;

        let tools = discovered?;
        if tools.is_empty() {
            return Err(Error::Discovery("tool host offers no tools".into()));
        }

        self.adapter.build_catalog(&tools);
        info!(count = tools.len(), "tool catalog ready");
        self.tools = tools;
        Ok(&self.tools)
    }

    /// Run one task on a fresh tool session and return the final answer.
    pub async fn run_task(&mut self, request: &str) -> Result<String> {
        self.run_task_until(request, std::future::pending::<()>())
            .await
    }

    /// Like [`run_task`](Self::run_task), but gives up with
    /// [`Error::Cancelled`] as soon as `cancel` completes.
    ///
    /// A cancelled task leaves the history as it was before the request and
    /// still closes its tool session.
    pub async fn run_task_until<F>(&mut self, request: &str, cancel: F) -> Result<String>
    where
        F: Future,
    {
        tokio::pin!(cancel);

        tokio::select! {
            prepared = self.prepare() => { prepared?; }
            _ = &mut cancel => return Err(Error::Cancelled),
        }
        if !self.options.carry_history {
            self.history.clear();
        }

        let session = tokio::select! {
            session = AgentSession::open(&self.connector) => session?,
            _ = &mut cancel => return Err(Error::Cancelled),
        };
        let span = info_span!("task", session = %session.id());
        info!(parent: &span, "task started");

        let engine = &self.options.engine;
        let outcome = tokio::select! {
            outcome = engine
                .run(&mut self.adapter, session.tools(), &mut self.history, request)
                .instrument(span.clone()) => outcome,
            _ = &mut cancel => {
                info!(parent: &span, "task cancelled");
                Err(Error::Cancelled)
            }
        };
        session.close().instrument(span).await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, HistoryShape, TurnRequest, TurnResponse};
    use crate::model::{ModelError, ToolInvocationRequest, ToolInvocationResult};
    use crate::tools::ToolError;
    use serde_json::{Map, json};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        released: AtomicUsize,
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        tools: Vec<ToolDescriptor>,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        tools: Vec<ToolDescriptor>,
    }

    impl ToolConnector for FakeConnector {
        type Session = FakeSession;

        async fn connect(&self) -> Result<FakeSession> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                counters: self.counters.clone(),
                tools: self.tools.clone(),
            })
        }
    }

    impl ToolSession for FakeSession {
        async fn discover_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
            Ok(self.tools.clone())
        }

        async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
            if request.tool_name == "browser_broken" {
                ToolInvocationResult::failure(request, ToolError::Execution("crashed".into()))
            } else {
                ToolInvocationResult::success(request, "ok")
            }
        }

        async fn close(self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptAdapter {
        catalog: Option<usize>,
        builds: usize,
        script: VecDeque<std::result::Result<TurnResponse, ModelError>>,
        transcripts: Vec<usize>,
        /// Never answer once the script is used up.
        hang: bool,
    }

    impl ScriptAdapter {
        fn new(script: Vec<std::result::Result<TurnResponse, ModelError>>) -> Self {
            Self {
                catalog: None,
                builds: 0,
                script: script.into(),
                transcripts: Vec::new(),
                hang: false,
            }
        }
    }

    impl ReasoningAdapter for ScriptAdapter {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                batching: true,
                history: HistoryShape::Resubmitted,
            }
        }

        fn build_catalog(&mut self, tools: &[ToolDescriptor]) {
            if self.catalog.is_none() {
                self.builds += 1;
                self.catalog = Some(tools.len());
            }
        }

        fn has_catalog(&self) -> bool {
            self.catalog.is_some()
        }

        async fn submit_turn(
            &mut self,
            request: TurnRequest<'_>,
        ) -> std::result::Result<TurnResponse, ModelError> {
            self.transcripts.push(request.transcript.len());
            match self.script.pop_front() {
                Some(response) => response,
                None if self.hang => std::future::pending().await,
                None => Ok(TurnResponse::Final("done".into())),
            }
        }
    }

    fn browser_tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("browser_navigate", "Navigate")
                .with_parameter("url", json!({"type": "string"}), true),
        ]
    }

    fn new_agent(
        script: Vec<std::result::Result<TurnResponse, ModelError>>,
        tools: Vec<ToolDescriptor>,
    ) -> (Agent<ScriptAdapter, FakeConnector>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let connector = FakeConnector {
            counters: counters.clone(),
            tools,
        };
        let agent = Agent::new(ScriptAdapter::new(script), connector, AgentOptions::default());
        (agent, counters)
    }

    fn tool_round(tool: &str) -> std::result::Result<TurnResponse, ModelError> {
        Ok(TurnResponse::ToolCalls {
            text: None,
            calls: vec![ToolInvocationRequest::new("call_0", tool, Map::new())],
        })
    }

    #[tokio::test]
    async fn prepare_discovers_once() {
        let (mut agent, counters) = new_agent(Vec::new(), browser_tools());

        assert_eq!(agent.prepare().await.unwrap().len(), 1);
        assert_eq!(agent.prepare().await.unwrap().len(), 1);

        assert_eq!(agent.adapter().builds, 1);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_catalog_is_rejected() {
        let (mut agent, counters) = new_agent(Vec::new(), Vec::new());

        let err = agent.run_task("anything").await.unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert!(!agent.adapter().has_catalog());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_closed_once_on_success() {
        let (mut agent, counters) = new_agent(
            vec![tool_round("browser_navigate"), Ok(TurnResponse::Final("Done".into()))],
            browser_tools(),
        );

        assert_eq!(agent.run_task("open it").await.unwrap(), "Done");
        // One discovery session plus one task session.
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn session_closed_once_on_tool_error() {
        let (mut agent, counters) = new_agent(
            vec![tool_round("browser_broken"), Ok(TurnResponse::Final("It broke".into()))],
            browser_tools(),
        );

        assert_eq!(agent.run_task("click").await.unwrap(), "It broke");
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn session_closed_once_on_reasoning_error() {
        let (mut agent, counters) = new_agent(
            vec![
                tool_round("browser_navigate"),
                Err(ModelError::Network("connection reset".into())),
            ],
            browser_tools(),
        );

        let err = agent.run_task("open it").await.unwrap_err();
        assert!(matches!(err, Error::Reasoning(ModelError::Network(_))));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn history_is_dropped_between_tasks_unless_carried() {
        let (mut agent, _) = new_agent(Vec::new(), browser_tools());
        agent.options.carry_history = false;

        agent.run_task("first").await.unwrap();
        agent.run_task("second").await.unwrap();
        assert_eq!(agent.history().len(), 2);
        assert_eq!(agent.adapter().transcripts, vec![0, 0]);

        let (mut carrying, _) = new_agent(Vec::new(), browser_tools());
        carrying.run_task("first").await.unwrap();
        carrying.run_task("second").await.unwrap();
        assert_eq!(carrying.history().len(), 4);
        assert_eq!(carrying.adapter().transcripts, vec![0, 2]);

        carrying.reset_history();
        assert!(carrying.history().is_empty());
    }

    #[tokio::test]
    async fn cancelled_task_rolls_back_and_closes_its_session() {
        let (mut agent, counters) = new_agent(Vec::new(), browser_tools());
        agent.run_task("first").await.unwrap();
        let before = agent.history().clone();

        agent.adapter.script.push_back(tool_round("browser_navigate"));
        agent.adapter.hang = true;
        let cancel = tokio::time::sleep(std::time::Duration::from_millis(50));
        let err = agent.run_task_until("second", cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(agent.history(), &before);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dropped_task_releases_its_session() {
        let (mut agent, counters) = new_agent(Vec::new(), browser_tools());
        agent.prepare().await.unwrap();
        agent.adapter.hang = true;

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            agent.run_task("never answered"),
        )
        .await;

        assert!(timed_out.is_err());
        assert!(agent.history().is_empty());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        // Dropped without close, but not leaked.
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 2);
    }
}
