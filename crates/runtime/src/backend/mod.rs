//! Reasoning service adapters.
//!
//! Each adapter hides one provider's request/response shape behind
//! [`ReasoningAdapter`]. Adapters differ in two ways the engine cares about:
//! whether they accept several tool calls per response (batching), and
//! whether they keep the conversation themselves or need the transcript
//! resubmitted on every turn.

mod gemini;
mod openai;

pub use gemini::{GeminiAdapter, GeminiAdapterBuilder};
pub use openai::{OpenAiAdapter, OpenAiAdapterBuilder};

use crate::model::{
    ConversationTurn, ModelError, ToolDescriptor, ToolInvocationRequest, ToolInvocationResult,
};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Who holds the conversation between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryShape {
    /// The adapter keeps its own provider-native history. The engine seeds it
    /// once per request and afterwards sends only new input.
    Managed,
    /// The adapter is stateless; the engine sends the whole transcript on
    /// every turn.
    Resubmitted,
}

/// What an adapter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Several tool calls may be requested, and answered, in one round.
    pub batching: bool,
    pub history: HistoryShape,
}

/// New input for the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    User(String),
    /// Results of the previous round, in request order.
    ToolResults(Vec<ToolInvocationResult>),
}

impl TurnInput {
    /// The history entry recording this input.
    pub fn to_turn(&self) -> ConversationTurn {
        match self {
            Self::User(text) => ConversationTurn::user(text.clone()),
            Self::ToolResults(results) => ConversationTurn::tool_results(results.clone()),
        }
    }
}

/// One turn to submit.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// Prior turns. Empty for [`HistoryShape::Managed`] adapters.
    pub transcript: &'a [ConversationTurn],
    pub input: &'a TurnInput,
}

/// What the reasoning service answered.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnResponse {
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolInvocationRequest>,
    },
    Final(String),
}

impl TurnResponse {
    /// `Final` when no calls were requested.
    pub fn from_parts(text: Option<String>, calls: Vec<ToolInvocationRequest>) -> Self {
        if calls.is_empty() {
            Self::Final(text.unwrap_or_default())
        } else {
            Self::ToolCalls { text, calls }
        }
    }
}

/// A reasoning service the engine can hold a tool-using conversation with.
pub trait ReasoningAdapter: Send {
    fn capabilities(&self) -> Capabilities;

    /// Translate the discovered tools into the provider's declaration form.
    /// Only the first call has an effect.
    fn build_catalog(&mut self, tools: &[ToolDescriptor]);

    fn has_catalog(&self) -> bool;

    /// Replace managed history with `transcript`. No-op for adapters that
    /// keep no history.
    fn seed(&mut self, transcript: &[ConversationTurn]) {
        let _ = transcript;
    }

    /// Submit one turn. Fails with [`ModelError::CatalogMissing`] before
    /// [`build_catalog`](Self::build_catalog).
    fn submit_turn(
        &mut self,
        request: TurnRequest<'_>,
    ) -> impl Future<Output = Result<TurnResponse, ModelError>> + Send;
}

/// Reasoning service providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Azure,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenAi => write!(f, "openai"),
            Self::Azure => write!(f, "azure"),
        }
    }
}

/// The adapter chosen from configuration.
pub enum BackendAdapter {
    Gemini(GeminiAdapter),
    OpenAi(OpenAiAdapter),
}

impl From<GeminiAdapter> for BackendAdapter {
    fn from(adapter: GeminiAdapter) -> Self {
        Self::Gemini(adapter)
    }
}

impl From<OpenAiAdapter> for BackendAdapter {
    fn from(adapter: OpenAiAdapter) -> Self {
        Self::OpenAi(adapter)
    }
}

impl std::fmt::Display for BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini(adapter) => std::fmt::Display::fmt(adapter, f),
            Self::OpenAi(adapter) => std::fmt::Display::fmt(adapter, f),
        }
    }
}

impl ReasoningAdapter for BackendAdapter {
    fn capabilities(&self) -> Capabilities {
        match self {
            Self::Gemini(adapter) => adapter.capabilities(),
            Self::OpenAi(adapter) => adapter.capabilities(),
        }
    }

    fn build_catalog(&mut self, tools: &[ToolDescriptor]) {
        match self {
            Self::Gemini(adapter) => adapter.build_catalog(tools),
            Self::OpenAi(adapter) => adapter.build_catalog(tools),
        }
    }

    fn has_catalog(&self) -> bool {
        match self {
            Self::Gemini(adapter) => adapter.has_catalog(),
            Self::OpenAi(adapter) => adapter.has_catalog(),
        }
    }

    fn seed(&mut self, transcript: &[ConversationTurn]) {
        match self {
            Self::Gemini(adapter) => adapter.seed(transcript),
            Self::OpenAi(adapter) => adapter.seed(transcript),
        }
    }

    async fn submit_turn(&mut self, request: TurnRequest<'_>) -> Result<TurnResponse, ModelError> {
        match self {
            Self::Gemini(adapter) => adapter.submit_turn(request).await,
            Self::OpenAi(adapter) => adapter.submit_turn(request).await,
        }
    }
}

/// Map a non-success HTTP response to a provider error.
async fn api_error(response: reqwest::Response) -> ModelError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ModelError::Api(format!("{status}: {body}"))
}
