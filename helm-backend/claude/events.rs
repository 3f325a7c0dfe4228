use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events delivered to the client, one SSE `data:` frame each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Init {
        tools: Vec<String>,
        mcp_servers: Vec<String>,
    },
    Tool {
        name: String,
        friendly_name: String,
        icon: String,
        input: Value,
    },
    Done {
        content: String,
        /// Staged uploads, kept so later turns can reference them.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_paths: Option<Vec<String>>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// `done` and `error` end the stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
