//! Tool sessions and MCP integration.

mod errors;
mod mcp_session;
mod session;

pub use errors::ToolError;
pub use mcp_session::{DEFAULT_REQUEST_TIMEOUT, McpConnector, McpToolSession};
pub use session::{ToolConnector, ToolSession};

use std::borrow::Cow;

const PREVIEW_CHARS: usize = 300;

/// The start of a tool payload, for logs.
pub fn preview(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => Cow::Owned(format!("{}...", &text[..end])),
        None => Cow::Borrowed(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");

        let long = "é".repeat(PREVIEW_CHARS + 10);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
