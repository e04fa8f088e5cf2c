//! OpenAI Chat Completions adapter, for both OpenAI and Azure OpenAI.

use super::{
    Capabilities, HistoryShape, ReasoningAdapter, TurnInput, TurnRequest, TurnResponse, api_error,
};
use crate::model::{
    ConversationTurn, ModelError, Part, Role, ToolDescriptor, ToolInvocationRequest,
    ToolInvocationResult,
};
use crate::schema::{FunctionDeclaration, SchemaTranslator};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Where requests go and how they authenticate.
#[derive(Debug, Clone)]
enum Endpoint {
    OpenAi {
        base_url: String,
        model: String,
    },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl Endpoint {
    fn url(&self) -> String {
        match self {
            Self::OpenAi { base_url, .. } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Self::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }

    fn model(&self) -> Option<&str> {
        match self {
            Self::OpenAi { model, .. } => Some(model),
            Self::Azure { .. } => None,
        }
    }

    fn authorize(&self, req: RequestBuilder, api_key: &str) -> RequestBuilder {
        match self {
            Self::OpenAi { .. } => req.bearer_auth(api_key),
            Self::Azure { .. } => req.header("api-key", api_key),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a FunctionDeclaration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn tool(result: &ToolInvocationResult) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(result.render()),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ApiFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI or Azure OpenAI adapter.
#[derive(Debug, Clone)]
pub struct OpenAiAdapterBuilder {
    api_key: String,
    endpoint: Endpoint,
    system: Option<String>,
    batching: bool,
}

impl OpenAiAdapterBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: Endpoint::OpenAi {
                base_url: OPENAI_API_URL.to_string(),
                model: model.into(),
            },
            system: None,
            batching: true,
        }
    }

    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: Endpoint::Azure {
                endpoint: endpoint.into(),
                deployment: deployment.into(),
                api_version: api_version.into(),
            },
            system: None,
            batching: true,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the API root. Ignored for Azure, whose root is the endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        if let Endpoint::OpenAi { base_url, .. } = &mut self.endpoint {
            *base_url = url.into();
        }
        self
    }

    /// Whether several calls per response are accepted.
    pub fn batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn build(self) -> OpenAiAdapter {
        OpenAiAdapter {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            endpoint: self.endpoint,
            system: self.system,
            batching: self.batching,
            declarations: None,
            next_call: 0,
        }
    }
}

/// Chat Completions adapter. Stateless: the transcript is resubmitted on
/// every turn.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    api_key: String,
    endpoint: Endpoint,
    system: Option<String>,
    batching: bool,
    declarations: Option<Vec<FunctionDeclaration>>,
    next_call: u64,
}

impl OpenAiAdapter {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> OpenAiAdapterBuilder {
        OpenAiAdapterBuilder::new(api_key, model)
    }

    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> OpenAiAdapterBuilder {
        OpenAiAdapterBuilder::azure(api_key, endpoint, deployment, api_version)
    }

    fn call_to_api(call: &ToolInvocationRequest) -> ApiToolCall {
        ApiToolCall {
            id: call.id.clone(),
            kind: function_kind(),
            function: ApiFunctionCall {
                name: call.tool_name.clone(),
                arguments: Value::Object(call.arguments.clone()).to_string(),
            },
        }
    }

    fn turn_to_api(turn: &ConversationTurn, messages: &mut Vec<ApiMessage>) {
        match turn.role {
            Role::User => messages.push(ApiMessage::text("user", turn.text())),
            Role::Reasoner => {
                let text = turn.text();
                messages.push(ApiMessage {
                    role: "assistant".to_string(),
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: turn
                        .tool_calls()
                        .into_iter()
                        .map(Self::call_to_api)
                        .collect(),
                    tool_call_id: None,
                });
            }
            Role::ToolResult => {
                for part in &turn.parts {
                    if let Part::ToolResult(result) = part {
                        messages.push(ApiMessage::tool(result));
                    }
                }
            }
        }
    }

    fn build_messages(&self, request: &TurnRequest<'_>) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(request.transcript.len() + 2);
        if let Some(system) = &self.system {
            messages.push(ApiMessage::text("system", system.clone()));
        }
        for turn in request.transcript {
            Self::turn_to_api(turn, &mut messages);
        }
        match request.input {
            TurnInput::User(text) => messages.push(ApiMessage::text("user", text.clone())),
            TurnInput::ToolResults(results) => {
                messages.extend(results.iter().map(ApiMessage::tool));
            }
        }
        messages
    }

    fn call_from_api(&mut self, call: ApiToolCall) -> ToolInvocationRequest {
        let id = if call.id.is_empty() {
            let id = format!("call_{}", self.next_call);
            self.next_call += 1;
            id
        } else {
            call.id
        };

        let name = call.function.name;
        let raw = call.function.arguments.trim();
        if raw.is_empty() {
            return ToolInvocationRequest::new(id, name, Map::new());
        }

        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(arguments)) => ToolInvocationRequest::new(id, name, arguments),
            Ok(other) => {
                warn!(tool = %name, "tool arguments are not an object");
                ToolInvocationRequest::malformed(
                    id,
                    name,
                    format!("arguments must be a JSON object, got {other}"),
                )
            }
            Err(e) => {
                warn!(tool = %name, "malformed tool arguments: {e}");
                ToolInvocationRequest::malformed(id, name, format!("arguments are not valid JSON: {e}"))
            }
        }
    }
}

impl std::fmt::Display for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Endpoint::OpenAi { model, .. } => write!(f, "openai({model})"),
            Endpoint::Azure { deployment, .. } => write!(f, "azure({deployment})"),
        }
    }
}

impl ReasoningAdapter for OpenAiAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            batching: self.batching,
            history: HistoryShape::Resubmitted,
        }
    }

    fn build_catalog(&mut self, tools: &[ToolDescriptor]) {
        if self.declarations.is_some() {
            return;
        }
        let schema = SchemaTranslator::translate(tools);
        debug!(tools = schema.len(), "openai tool catalog built");
        self.declarations = Some(schema.declarations().to_vec());
    }

    fn has_catalog(&self) -> bool {
        self.declarations.is_some()
    }

    async fn submit_turn(&mut self, request: TurnRequest<'_>) -> Result<TurnResponse, ModelError> {
        let response = {
            let declarations = self
                .declarations
                .as_deref()
                .ok_or(ModelError::CatalogMissing)?;

            let tools: Vec<ApiTool<'_>> = declarations
                .iter()
                .map(|function| ApiTool {
                    kind: "function",
                    function,
                })
                .collect();
            let parallel_tool_calls = (!self.batching && !tools.is_empty()).then_some(false);

            let api_request = ApiRequest {
                model: self.endpoint.model(),
                messages: self.build_messages(&request),
                tools,
                parallel_tool_calls,
            };

            trace!(messages = api_request.messages.len(), "sending chat completion request");
            let req = self.client.post(self.endpoint.url()).json(&api_request);
            self.endpoint
                .authorize(req, &self.api_key)
                .send()
                .await
                .map_err(|e| ModelError::Network(e.to_string()))?
        };

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;
        trace!(finish_reason = ?choice.finish_reason, "chat completion received");

        let mut tool_calls = choice.message.tool_calls;
        if !self.batching && tool_calls.len() > 1 {
            warn!(requested = tool_calls.len(), "batching disabled, keeping first call");
            tool_calls.truncate(1);
        }

        let calls = tool_calls
            .into_iter()
            .map(|call| self.call_from_api(call))
            .collect();
        let text = choice.message.content.filter(|t| !t.is_empty());

        Ok(TurnResponse::from_parts(text, calls))
    }
}
