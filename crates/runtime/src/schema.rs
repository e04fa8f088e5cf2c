//! Tool schema translation.
//!
//! Turns discovered [`ToolDescriptor`]s into the function-declaration form
//! reasoning services accept: one declaration per tool whose parameters are
//! an object schema with `properties` and `required`.

use crate::model::{ParameterSpec, ToolDescriptor};
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Type assumed for parameters that declare none.
pub const DEFAULT_PARAMETER_TYPE: &str = "string";

/// One callable function as a reasoning service sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The tool catalog in provider-neutral form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProviderToolSchema {
    declarations: Vec<FunctionDeclaration>,
}

impl ProviderToolSchema {
    pub fn declarations(&self) -> &[FunctionDeclaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.declarations.iter().find(|d| d.name == name)
    }
}

/// Stateless translator from tool descriptors to declarations.
pub struct SchemaTranslator;

impl SchemaTranslator {
    /// Translate every tool, preserving order. Pure; an empty input yields
    /// an empty schema.
    pub fn translate(tools: &[ToolDescriptor]) -> ProviderToolSchema {
        ProviderToolSchema {
            declarations: tools.iter().map(Self::declaration).collect(),
        }
    }

    fn declaration(tool: &ToolDescriptor) -> FunctionDeclaration {
        let properties: Map<String, Value> = tool
            .parameters
            .iter()
            .map(|param| (param.name.clone(), Self::parameter_schema(param)))
            .collect();

        let required: Vec<&str> = tool
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect();

        FunctionDeclaration {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    fn parameter_schema(param: &ParameterSpec) -> Value {
        let mut schema = param.schema.clone();
        if !schema.contains_key("type") {
            schema.insert("type".into(), Value::from(DEFAULT_PARAMETER_TYPE));
        }
        Value::Object(schema)
    }
}
