//! Gemini `generateContent` adapter.

use super::{
    Capabilities, HistoryShape, ReasoningAdapter, TurnInput, TurnRequest, TurnResponse, api_error,
};
use crate::model::{
    ConversationTurn, ModelError, Part, Role, ToolDescriptor, ToolInvocationRequest,
    ToolInvocationResult, ToolOutcome,
};
use crate::schema::{FunctionDeclaration, SchemaTranslator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use tracing::{debug, trace};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Schema keywords the Gemini function-declaration dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    contents: &'a [ApiContent],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

impl ApiContent {
    fn new(role: &str, parts: Vec<ApiPart>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

impl ApiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a Gemini adapter.
#[derive(Debug, Clone)]
pub struct GeminiAdapterBuilder {
    api_key: String,
    model: String,
    base_url: String,
    system: Option<String>,
    batching: bool,
}

impl GeminiAdapterBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_URL.to_string(),
            system: None,
            batching: true,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the API root, e.g. for a proxy.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Whether several calls per response are accepted.
    pub fn batching(mut self, batching: bool) -> Self {
        self.batching = batching;
        self
    }

    pub fn build(self) -> GeminiAdapter {
        GeminiAdapter {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            system: self.system,
            batching: self.batching,
            declarations: None,
            contents: Vec::new(),
            provider_ids: HashSet::new(),
            next_call: 0,
        }
    }
}

/// Gemini adapter. Keeps the conversation as native `contents` so that
/// provider-only parts such as thought signatures survive between turns.
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system: Option<String>,
    batching: bool,
    declarations: Option<Vec<FunctionDeclaration>>,
    contents: Vec<ApiContent>,
    /// Call ids that came from the service rather than being synthesized.
    provider_ids: HashSet<String>,
    next_call: u64,
}

impl GeminiAdapter {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> GeminiAdapterBuilder {
        GeminiAdapterBuilder::new(api_key, model)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn call_to_api(&self, call: &ToolInvocationRequest) -> ApiPart {
        ApiPart {
            function_call: Some(ApiFunctionCall {
                id: self.provider_id(&call.id),
                name: call.tool_name.clone(),
                args: Value::Object(call.arguments.clone()),
            }),
            ..Default::default()
        }
    }

    fn result_to_api(&self, result: &ToolInvocationResult) -> ApiPart {
        let response = match &result.outcome {
            ToolOutcome::Success { payload } => json!({ "result": payload }),
            ToolOutcome::Failure { error } => json!({ "error": error.to_string() }),
        };
        ApiPart {
            function_response: Some(ApiFunctionResponse {
                id: self.provider_id(&result.call_id),
                name: result.tool_name.clone(),
                response,
            }),
            ..Default::default()
        }
    }

    fn provider_id(&self, id: &str) -> Option<String> {
        self.provider_ids.contains(id).then(|| id.to_string())
    }

    fn turn_to_api(&self, turn: &ConversationTurn) -> ApiContent {
        let role = match turn.role {
            Role::Reasoner => "model",
            Role::User | Role::ToolResult => "user",
        };
        let parts = turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => ApiPart::text(text.clone()),
                Part::ToolCall(call) => self.call_to_api(call),
                Part::ToolResult(result) => self.result_to_api(result),
            })
            .collect();
        ApiContent::new(role, parts)
    }

    fn input_to_api(&self, input: &TurnInput) -> ApiContent {
        match input {
            TurnInput::User(text) => ApiContent::new("user", vec![ApiPart::text(text.clone())]),
            TurnInput::ToolResults(results) => ApiContent::new(
                "user",
                results.iter().map(|r| self.result_to_api(r)).collect(),
            ),
        }
    }

    fn call_from_api(&mut self, call: &ApiFunctionCall) -> Result<ToolInvocationRequest, ModelError> {
        let arguments = match &call.args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ModelError::InvalidResponse(format!(
                    "arguments for `{}` are not an object: {other}",
                    call.name
                )));
            }
        };

        let id = match &call.id {
            Some(id) => {
                self.provider_ids.insert(id.clone());
                id.clone()
            }
            None => {
                let id = format!("call_{}", self.next_call);
                self.next_call += 1;
                id
            }
        };

        Ok(ToolInvocationRequest::new(id, call.name.clone(), arguments))
    }

    async fn generate(&self) -> Result<ApiContent, ModelError> {
        let declarations = self
            .declarations
            .as_deref()
            .ok_or(ModelError::CatalogMissing)?;

        let tools = if declarations.is_empty() {
            Vec::new()
        } else {
            vec![ApiTool {
                function_declarations: declarations,
            }]
        };
        let api_request = ApiRequest {
            contents: &self.contents,
            tools,
            system_instruction: self.system.as_ref().map(|s| ApiContent {
                role: None,
                parts: vec![ApiPart::text(s.clone())],
            }),
        };

        trace!(contents = self.contents.len(), "sending generateContent request");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let candidate = api_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no candidates".into()))?;

        let finish_reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        candidate
            .content
            .filter(|content| !content.parts.is_empty())
            .ok_or_else(|| {
                ModelError::InvalidResponse(format!(
                    "candidate has no content (finish reason: {finish_reason})"
                ))
            })
    }

    /// Turn the model's content into a response and the content to record.
    fn interpret(&mut self, mut content: ApiContent) -> Result<(ApiContent, TurnResponse), ModelError> {
        content.role = Some("model".into());

        if !self.batching {
            let mut seen_call = false;
            content.parts.retain(|part| {
                if part.function_call.is_none() {
                    return true;
                }
                let keep = !seen_call;
                seen_call = true;
                keep
            });
        }

        let mut text = String::new();
        let mut calls = Vec::new();
        for part in &content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(t) = &part.text {
                text.push_str(t);
            }
            if let Some(call) = &part.function_call {
                calls.push(self.call_from_api(call)?);
            }
        }

        let text = (!text.is_empty()).then_some(text);
        Ok((content, TurnResponse::from_parts(text, calls)))
    }
}

impl std::fmt::Display for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gemini({})", self.model)
    }
}

impl ReasoningAdapter for GeminiAdapter {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            batching: self.batching,
            history: HistoryShape::Managed,
        }
    }

    fn build_catalog(&mut self, tools: &[ToolDescriptor]) {
        if self.declarations.is_some() {
            return;
        }
        let declarations: Vec<FunctionDeclaration> = SchemaTranslator::translate(tools)
            .declarations()
            .iter()
            .cloned()
            .map(|mut decl| {
                strip_unsupported(&mut decl.parameters);
                decl
            })
            .collect();
        debug!(tools = declarations.len(), "gemini tool catalog built");
        self.declarations = Some(declarations);
    }

    fn has_catalog(&self) -> bool {
        self.declarations.is_some()
    }

    fn seed(&mut self, transcript: &[ConversationTurn]) {
        let contents = transcript.iter().map(|t| self.turn_to_api(t)).collect();
        self.contents = contents;
    }

    async fn submit_turn(&mut self, request: TurnRequest<'_>) -> Result<TurnResponse, ModelError> {
        if self.declarations.is_none() {
            return Err(ModelError::CatalogMissing);
        }

        let input = self.input_to_api(request.input);
        self.contents.push(input);

        let outcome = match self.generate().await {
            Ok(content) => self.interpret(content),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((content, response)) => {
                self.contents.push(content);
                Ok(response)
            }
            Err(e) => {
                self.contents.pop();
                Err(e)
            }
        }
    }
}

/// Keywords that hold named subschemas; their keys are names, not keywords.
const NAMED_SUBSCHEMAS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

fn strip_unsupported(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for key in UNSUPPORTED_SCHEMA_KEYS {
                map.remove(*key);
            }
            for (key, value) in map.iter_mut() {
                match value {
                    Value::Object(named) if NAMED_SUBSCHEMAS.contains(&key.as_str()) => {
                        named.values_mut().for_each(strip_unsupported);
                    }
                    value => strip_unsupported(value),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PATH: &str = "/v1beta/models/gemini-test:generateContent";

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("browser_navigate", "Navigate to a URL")
                .with_parameter("url", json!({"type": "string"}), true),
        ]
    }

    fn adapter(server: &MockServer) -> GeminiAdapter {
        let mut adapter = GeminiAdapter::builder("test-key", "gemini-test")
            .base_url(server.uri())
            .system("Drive the browser.")
            .build();
        adapter.build_catalog(&tools());
        adapter
    }

    fn model_reply(parts: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"role": "model", "parts": parts}, "finishReason": "STOP"}]
        }))
    }

    async fn sent_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.body_json::<Value>().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn submit_before_catalog_fails() {
        let mut adapter = GeminiAdapter::builder("key", "gemini-test").build();
        let input = TurnInput::User("hi".into());
        let err = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::CatalogMissing));
    }

    #[tokio::test]
    async fn function_call_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(PATH))
            .and(body_string_contains("functionResponse"))
            .respond_with(model_reply(json!([{"text": "The page is open."}])))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(model_reply(json!([
                {"text": "planning", "thought": true},
                {"functionCall": {"name": "browser_navigate", "args": {"url": "https://example.com"}},
                 "thoughtSignature": "sig-1"}
            ])))
            .mount(&server)
            .await;

        let mut adapter = adapter(&server);
        let input = TurnInput::User("open example.com".into());
        let response = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap();

        let TurnResponse::ToolCalls { text, calls } = response else {
            panic!("expected tool calls");
        };
        assert_eq!(text, None);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments["url"], "https://example.com");

        let results = TurnInput::ToolResults(vec![ToolInvocationResult::success(
            &calls[0],
            "Navigated",
        )]);
        let response = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &results,
            })
            .await
            .unwrap();
        assert_eq!(response, TurnResponse::Final("The page is open.".into()));

        let bodies = sent_bodies(&server).await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["systemInstruction"]["parts"][0]["text"], "Drive the browser.");
        assert_eq!(
            bodies[0]["tools"][0]["functionDeclarations"][0]["name"],
            "browser_navigate"
        );

        let second = bodies[1]["contents"].as_array().unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[1]["role"], "model");
        assert_eq!(second[1]["parts"][1]["thoughtSignature"], "sig-1");
        assert_eq!(
            second[2]["parts"][0]["functionResponse"],
            json!({"name": "browser_navigate", "response": {"result": "Navigated"}})
        );
    }

    #[tokio::test]
    async fn failed_result_is_sent_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(model_reply(json!([{"text": "ok"}])))
            .mount(&server)
            .await;

        let mut adapter = adapter(&server);
        let call = ToolInvocationRequest::new("call_7", "browser_click", Map::new());
        let input = TurnInput::ToolResults(vec![ToolInvocationResult::failure(
            &call,
            ToolError::Host("no element".into()),
        )]);
        adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap();

        let bodies = sent_bodies(&server).await;
        let response = &bodies[0]["contents"][0]["parts"][0]["functionResponse"];
        assert_eq!(
            response["response"]["error"],
            "tool reported an error: no element"
        );
        assert!(response.get("id").is_none());
    }

    #[tokio::test]
    async fn provider_error_rolls_back_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let mut adapter = adapter(&server);
        let input = TurnInput::User("hi".into());
        let err = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::Api(ref msg) if msg.contains("quota")));
        assert!(adapter.contents.is_empty());
    }

    #[tokio::test]
    async fn empty_candidates_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let mut adapter = adapter(&server);
        let input = TurnInput::User("hi".into());
        let err = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn without_batching_only_first_call_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(model_reply(json!([
                {"functionCall": {"id": "a", "name": "browser_navigate", "args": {"url": "https://a.example"}}},
                {"functionCall": {"id": "b", "name": "browser_navigate", "args": {"url": "https://b.example"}}}
            ])))
            .mount(&server)
            .await;

        let mut adapter = GeminiAdapter::builder("key", "gemini-test")
            .base_url(server.uri())
            .batching(false)
            .build();
        adapter.build_catalog(&tools());
        assert!(!adapter.capabilities().batching);

        let input = TurnInput::User("go".into());
        let response = adapter
            .submit_turn(TurnRequest {
                transcript: &[],
                input: &input,
            })
            .await
            .unwrap();

        let TurnResponse::ToolCalls { calls, .. } = response else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        assert_eq!(adapter.contents[1].parts.len(), 1);
    }

    #[test]
    fn seed_replaces_history_and_keeps_provider_ids() {
        let mut adapter = GeminiAdapter::builder("key", "gemini-test").build();
        adapter.provider_ids.insert("p-1".into());

        let call = ToolInvocationRequest::new("p-1", "browser_snapshot", Map::new());
        let transcript = vec![
            ConversationTurn::user("look"),
            ConversationTurn::reasoner(None, vec![call.clone()]),
            ConversationTurn::tool_results(vec![ToolInvocationResult::success(&call, "page")]),
        ];
        adapter.seed(&transcript);
        adapter.seed(&transcript);

        assert_eq!(adapter.contents.len(), 3);
        assert_eq!(adapter.contents[1].role.as_deref(), Some("model"));
        let call_part = adapter.contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call_part.id.as_deref(), Some("p-1"));
        assert_eq!(adapter.contents[2].role.as_deref(), Some("user"));
    }

    #[test]
    fn catalog_drops_unsupported_schema_keys() {
        let mut adapter = GeminiAdapter::builder("key", "gemini-test").build();
        let tool = ToolDescriptor::new("browser_fill", "Fill fields").with_parameter(
            "fields",
            json!({"type": "array", "items": {"type": "object", "additionalProperties": false}}),
            true,
        );
        adapter.build_catalog(&[tool]);
        adapter.build_catalog(&[]);

        let declarations = adapter.declarations.as_ref().unwrap();
        assert_eq!(declarations.len(), 1);
        let items = &declarations[0].parameters["properties"]["fields"]["items"];
        assert_eq!(items, &json!({"type": "object"}));
    }

    #[test]
    fn parameters_named_like_keywords_survive() {
        let mut adapter = GeminiAdapter::builder("key", "gemini-test").build();
        let tool = ToolDescriptor::new("browser_evaluate", "Run a script")
            .with_parameter("additionalProperties", json!({"type": "string"}), true)
            .with_parameter(
                "options",
                json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"$schema": {"type": "string", "additionalProperties": true}}
                }),
                false,
            );
        adapter.build_catalog(&[tool]);

        let parameters = &adapter.declarations.as_ref().unwrap()[0].parameters;
        assert_eq!(
            parameters["properties"]["additionalProperties"],
            json!({"type": "string"})
        );
        assert_eq!(
            parameters["properties"]["options"],
            json!({"type": "object", "properties": {"$schema": {"type": "string"}}})
        );
        assert_eq!(parameters["required"], json!(["additionalProperties"]));
    }
}
