//! Parsing of the assistant's `--output-format stream-json` output.
//!
//! Stdout arrives as arbitrary byte chunks. [`LineBuffer`] reassembles them
//! into complete lines and [`parse_line`] turns each line into zero or more
//! [`Record`]s. Lines that are not JSON are skipped; the CLI is allowed to
//! print diagnostics on stdout.

use serde_json::Value;

/// One classified record from the assistant's output.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Init {
        tools: Vec<String>,
        mcp_servers: Vec<String>,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    Text(String),
    Result {
        result: Option<String>,
        subtype: Option<String>,
    },
}

/// Reassembles newline-delimited lines from raw byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk and return every line it completes. The unterminated tail
    /// is kept and prefixed to the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect()
    }

    /// Drain whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
        (!line.trim().is_empty()).then_some(line)
    }
}

/// Parse and classify one line. Non-JSON lines are logged and yield nothing.
pub fn parse_line(line: &str) -> Vec<Record> {
    match serde_json::from_str::<Value>(line) {
        Ok(json) => classify(&json),
        Err(_) => {
            let preview: String = line.chars().take(100).collect();
            tracing::debug!(line = %preview, "failed to parse line");
            Vec::new()
        }
    }
}

/// Classify a parsed JSON record.
pub fn classify(json: &Value) -> Vec<Record> {
    let event_type = match json.get("type").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return vec![],
    };

    match event_type {
        "system" => {
            if json.get("subtype").and_then(|v| v.as_str()) != Some("init") {
                return vec![];
            }
            let tools = json
                .get("tools")
                .and_then(|v| v.as_array())
                .map(|tools| {
                    tools
                        .iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            let mcp_servers = json
                .get("mcp_servers")
                .and_then(|v| v.as_array())
                .map(|servers| {
                    servers
                        .iter()
                        .filter(|s| s.get("status").and_then(|v| v.as_str()) == Some("connected"))
                        .filter_map(|s| s.get("name").and_then(|v| v.as_str()).map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            vec![Record::Init { tools, mcp_servers }]
        }
        "assistant" => {
            let content = match json
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            {
                Some(c) => c,
                None => return vec![],
            };

            let mut records = Vec::new();
            for block in content {
                match block.get("type").and_then(|v| v.as_str()) {
                    Some("tool_use") => {
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("?")
                            .to_string();
                        let input = block
                            .get("input")
                            .filter(|v| !v.is_null())
                            .cloned()
                            .unwrap_or_else(|| Value::Object(Default::default()));
                        records.push(Record::ToolUse { name, input });
                    }
                    Some("text") => {
                        let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                        if !text.is_empty() {
                            records.push(Record::Text(text.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            records
        }
        "result" => {
            let result = json
                .get("result")
                .and_then(|v| v.as_str())
                .map(String::from);
            let subtype = json
                .get("subtype")
                .and_then(|v| v.as_str())
                .map(String::from);
            vec![Record::Result { result, subtype }]
        }
        _ => vec![],
    }
}
