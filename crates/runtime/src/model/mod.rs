//! Tool and conversation types shared by every component.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{
    ConversationHistory, ConversationTurn, ParameterSpec, Part, Role, ToolDescriptor,
    ToolInvocationRequest, ToolInvocationResult, ToolOutcome,
};
