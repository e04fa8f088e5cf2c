//! The conversation loop.
//!
//! One request runs `AwaitingUserInput → Reasoning → (ToolDispatch →
//! Reasoning)* → Done`. Tool calls of a round are invoked one after another
//! in the order requested, and their results go back in that same order,
//! failures included. A response without tool calls ends the request.
//!
//! History is staged: turns are appended as the loop goes, and rolled back
//! if the request fails or its future is dropped.

use crate::backend::{HistoryShape, ReasoningAdapter, TurnInput, TurnRequest, TurnResponse};
use crate::model::{
    ConversationHistory, ConversationTurn, ModelError, ToolInvocationRequest, ToolInvocationResult,
    ToolOutcome,
};
use crate::tools::{ToolError, ToolSession};
use crate::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default bound on tool rounds per request.
pub const DEFAULT_MAX_TURNS: usize = 32;

/// Where the loop is within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingUserInput,
    Reasoning,
    ToolDispatch,
    Done,
}

impl EngineState {
    fn advance(&mut self, next: EngineState) {
        debug!(from = ?*self, to = ?next, "engine state");
        *self = next;
    }
}

/// Runs requests against a reasoning adapter and a tool session.
#[derive(Debug, Clone)]
pub struct ConversationEngine {
    max_turns: Option<usize>,
    tool_timeout: Option<Duration>,
    reasoning_timeout: Option<Duration>,
}

impl Default for ConversationEngine {
    fn default() -> Self {
        Self {
            max_turns: Some(DEFAULT_MAX_TURNS),
            tool_timeout: None,
            reasoning_timeout: None,
        }
    }
}

impl ConversationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of tool rounds per request. `None` removes the bound.
    pub fn max_turns(mut self, max_turns: Option<usize>) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Fail a single tool call that takes longer than `limit`.
    pub fn tool_timeout(mut self, limit: Duration) -> Self {
        self.tool_timeout = Some(limit);
        self
    }

    /// Fail the request when the reasoning service takes longer than `limit`.
    pub fn reasoning_timeout(mut self, limit: Duration) -> Self {
        self.reasoning_timeout = Some(limit);
        self
    }

    /// Run one request to completion and return the final text unchanged.
    ///
    /// `history` gains the request's turns only if this returns `Ok`.
    pub async fn run<A, S>(
        &self,
        adapter: &mut A,
        tools: &S,
        history: &mut ConversationHistory,
        request: &str,
    ) -> Result<String>
    where
        A: ReasoningAdapter,
        S: ToolSession,
    {
        if !adapter.has_catalog() {
            return Err(Error::InvalidState(
                "tool catalog has not been built".into(),
            ));
        }

        let capabilities = adapter.capabilities();
        let mut history = Staged::new(history);
        if capabilities.history == HistoryShape::Managed {
            adapter.seed(history.turns());
        }

        let mut state = EngineState::AwaitingUserInput;
        let mut input = TurnInput::User(request.to_string());
        let mut rounds = 0usize;

        loop {
            state.advance(EngineState::Reasoning);
            let transcript: &[ConversationTurn] = match capabilities.history {
                HistoryShape::Managed => &[],
                HistoryShape::Resubmitted => history.turns(),
            };
            let response = self
                .reason(
                    adapter,
                    TurnRequest {
                        transcript,
                        input: &input,
                    },
                )
                .await?;
            history.push(input.to_turn());

            let (text, mut calls) = match response {
                TurnResponse::Final(text) => {
                    history.push(ConversationTurn::reasoner(Some(text.clone()), Vec::new()));
                    history.commit();
                    state.advance(EngineState::Done);
                    info!(rounds, "request complete");
                    return Ok(text);
                }
                TurnResponse::ToolCalls { text, calls } => (text, calls),
            };

            rounds += 1;
            if let Some(limit) = self.max_turns.filter(|&limit| rounds > limit) {
                warn!(limit, "tool round limit reached");
                return Err(Error::TurnLimitExceeded { limit });
            }

            if !capabilities.batching && calls.len() > 1 {
                warn!(
                    dropped = calls.len() - 1,
                    "adapter takes one call per round, dropping the rest"
                );
                calls.truncate(1);
            }
            if let Some(text) = &text {
                info!("reasoner: {text}");
            }

            state.advance(EngineState::ToolDispatch);
            let results = self.dispatch(tools, &calls).await;
            history.push(ConversationTurn::reasoner(text, calls));
            input = TurnInput::ToolResults(results);
        }
    }

    async fn reason<A: ReasoningAdapter>(
        &self,
        adapter: &mut A,
        request: TurnRequest<'_>,
    ) -> Result<TurnResponse> {
        let response = match self.reasoning_timeout {
            Some(limit) => timeout(limit, adapter.submit_turn(request))
                .await
                .map_err(|_| ModelError::Timeout(limit))?,
            None => adapter.submit_turn(request).await,
        };
        Ok(response?)
    }

    async fn dispatch<S: ToolSession>(
        &self,
        tools: &S,
        calls: &[ToolInvocationRequest],
    ) -> Vec<ToolInvocationResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if let Some(reason) = &call.argument_error {
                warn!(tool = %call.tool_name, "not invoking tool: {reason}");
                let error = ToolError::InvalidInput(reason.clone());
                results.push(ToolInvocationResult::failure(call, error));
                continue;
            }

            info!(tool = %call.tool_name, id = %call.id, "calling tool");
            let result = match self.tool_timeout {
                Some(limit) => match timeout(limit, tools.invoke(call)).await {
                    Ok(result) => result,
                    Err(_) => ToolInvocationResult::failure(
                        call,
                        ToolError::Timeout(limit.as_millis() as u64),
                    ),
                },
                None => tools.invoke(call).await,
            };

            if let ToolOutcome::Failure { error } = &result.outcome {
                warn!(tool = %call.tool_name, "tool call failed: {error}");
            }
            results.push(result);
        }
        results
    }
}

/// History writes that only stick once committed.
struct Staged<'a> {
    history: &'a mut ConversationHistory,
    checkpoint: usize,
    committed: bool,
}

impl<'a> Staged<'a> {
    fn new(history: &'a mut ConversationHistory) -> Self {
        let checkpoint = history.len();
        Self {
            history,
            checkpoint,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Deref for Staged<'_> {
    type Target = ConversationHistory;

    fn deref(&self) -> &ConversationHistory {
        self.history
    }
}

impl DerefMut for Staged<'_> {
    fn deref_mut(&mut self) -> &mut ConversationHistory {
        self.history
    }
}

impl Drop for Staged<'_> {
    fn drop(&mut self) {
        if !self.committed && self.history.len() > self.checkpoint {
            debug!(
                discarded = self.history.len() - self.checkpoint,
                "rolling back unfinished request"
            );
            self.history.truncate(self.checkpoint);
        }
    }
}
