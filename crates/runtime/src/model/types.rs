use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// JSON schema of the parameter as the host declared it.
    pub schema: Map<String, Value>,
    pub required: bool,
}

impl ParameterSpec {
    /// The declared `type`, if any.
    pub fn kind(&self) -> Option<&str> {
        self.schema.get("type").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.schema.get("description").and_then(Value::as_str)
    }
}

/// A tool discovered on the tool host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter. A non-object `schema` is treated as an empty schema.
    pub fn with_parameter(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let schema = match schema {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.parameters.push(ParameterSpec {
            name: name.into(),
            schema,
            required,
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl ToolDescriptor {
    /// Build a descriptor from a tool's wire `inputSchema`
    /// (`{type: object, properties, required}`).
    ///
    /// Names listed in `required` but missing from `properties` are kept with
    /// an empty schema.
    pub fn from_input_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: &Map<String, Value>,
    ) -> Self {
        let mut descriptor = Self::new(name, description);
        let required: Vec<&str> = input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if let Some(Value::Object(properties)) = input_schema.get("properties") {
            for (param, schema) in properties {
                let is_required = required.contains(&param.as_str());
                descriptor = descriptor.with_parameter(param, schema.clone(), is_required);
            }
        }

        for param in required {
            if descriptor.parameter(param).is_none() {
                warn!(
                    tool = %descriptor.name,
                    param,
                    "required parameter has no schema, treating it as a string"
                );
                descriptor = descriptor.with_parameter(param, Value::Null, true);
            }
        }

        descriptor
    }
}

/// A tool call requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// Correlates the call with its result.
    pub id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// Set when the reasoning service sent arguments that could not be read.
    /// Such a call is answered with an error instead of being invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_error: Option<String>,
}

impl ToolInvocationRequest {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            argument_error: None,
        }
    }

    /// A call whose arguments were unusable.
    pub fn malformed(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            argument_error: Some(reason.into()),
            ..Self::new(id, tool_name, Map::new())
        }
    }
}

/// Outcome of a tool execution. Exactly one of payload or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Failure { error: ToolError },
}

/// Result of a tool execution, paired with the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolInvocationResult {
    pub fn success(request: &ToolInvocationRequest, payload: impl Into<Value>) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Success {
                payload: payload.into(),
            },
        }
    }

    pub fn failure(request: &ToolInvocationRequest, error: ToolError) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Failure { error },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }

    /// The result as plain text for backends that take string tool output.
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success {
                payload: Value::String(text),
            } => text.clone(),
            ToolOutcome::Success { payload } => payload.to_string(),
            ToolOutcome::Failure { error } => format!("error: {error}"),
        }
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Reasoner,
    ToolResult,
}

/// A part of a turn, which can be text or a tool interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    ToolCall(ToolInvocationRequest),
    ToolResult(ToolInvocationResult),
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// A reasoner turn: optional narration followed by the requested calls.
    pub fn reasoner(text: Option<String>, calls: Vec<ToolInvocationRequest>) -> Self {
        let mut parts: Vec<Part> = text
            .filter(|t| !t.is_empty())
            .map(Part::Text)
            .into_iter()
            .collect();
        parts.extend(calls.into_iter().map(Part::ToolCall));
        Self {
            role: Role::Reasoner,
            parts,
        }
    }

    pub fn tool_results(results: Vec<ToolInvocationResult>) -> Self {
        Self {
            role: Role::ToolResult,
            parts: results.into_iter().map(Part::ToolResult).collect(),
        }
    }

    /// Get combined text content from all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&ToolInvocationRequest> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> Vec<&ToolInvocationResult> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }
}

/// Ordered turns of one conversation.
///
/// Only the engine appends; callers read it or reset it between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub(crate) fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
    }
}
