//! Per-request session: stage images, run the assistant, translate its
//! output into [`StreamEvent`]s and guarantee exactly one terminal event.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

use super::error::BridgeError;
use super::events::StreamEvent;
use super::process::{ClaudeCommand, ClaudeProcess, ProcessRegistry};
use super::prompt::{self, ConversationEntry};
use super::protocol::{self, LineBuffer, Record};
use super::tool_display;
use crate::images::ImageStaging;

pub const NO_RESPONSE_MESSAGE: &str = "I processed your request but have no response.";

pub const MAX_TURNS_MESSAGE: &str = "I ran out of turns while working on this task. \
The request may be too complex for a single query. Try breaking it into smaller questions, \
or ask me to continue where I left off.";

const EVENT_BUFFER: usize = 64;
const READ_CHUNK: usize = 8 * 1024;
const TOOL_KEY_INPUT_CHARS: usize = 50;

/// One chat turn as accepted by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    pub images: Vec<String>,
    pub history: Vec<ConversationEntry>,
}

/// Dedup key for a tool call: name plus a prefix of its serialized input.
pub fn tool_call_key(name: &str, input: &serde_json::Value) -> String {
    let serialized = input.to_string();
    let prefix: String = serialized.chars().take(TOOL_KEY_INPUT_CHARS).collect();
    format!("{name}-{prefix}")
}

/// What a session has learned from the assistant so far.
#[derive(Debug, Default)]
struct SessionState {
    seen_tool_calls: HashSet<String>,
    last_text: String,
    final_result: String,
}

impl SessionState {
    /// Fold one record into the state; returns the event to forward, if any.
    fn apply(&mut self, record: Record) -> Option<StreamEvent> {
        match record {
            Record::Init { tools, mcp_servers } => Some(StreamEvent::Init { tools, mcp_servers }),
            Record::ToolUse { name, input } => {
                if !self.seen_tool_calls.insert(tool_call_key(&name, &input)) {
                    return None;
                }
                let display = tool_display::describe(&name, &input);
                let input = tool_display::display_input(&name, &input);
                Some(StreamEvent::Tool {
                    name,
                    friendly_name: display.friendly_name,
                    icon: display.icon.to_string(),
                    input,
                })
            }
            Record::Text(text) => {
                self.last_text = text;
                None
            }
            Record::Result { result, subtype } => {
                match result.filter(|r| !r.is_empty()) {
                    Some(result) => self.final_result = result,
                    None if subtype.as_deref() == Some("error_max_turns") => {
                        self.final_result = MAX_TURNS_MESSAGE.to_string();
                    }
                    None => {}
                }
                None
            }
        }
    }

    fn final_content(self) -> String {
        if !self.final_result.is_empty() {
            self.final_result
        } else if !self.last_text.is_empty() {
            self.last_text
        } else {
            NO_RESPONSE_MESSAGE.to_string()
        }
    }
}

enum Outcome {
    Completed,
    /// The listener went away; the process has been killed.
    Detached,
}

/// Runs chat sessions against the assistant binary.
#[derive(Clone)]
pub struct Bridge {
    command: Arc<ClaudeCommand>,
    registry: ProcessRegistry,
    staging: ImageStaging,
    timeout: Duration,
    reap_delay: Duration,
}

impl Bridge {
    pub fn new(command: ClaudeCommand, registry: ProcessRegistry, staging: ImageStaging, timeout: Duration) -> Self {
        Self {
            command: Arc::new(command),
            registry,
            staging,
            timeout,
            reap_delay: Duration::from_millis(500),
        }
    }

    pub fn with_reap_delay(mut self, reap_delay: Duration) -> Self {
        self.reap_delay = reap_delay;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn staging(&self) -> &ImageStaging {
        &self.staging
    }

    /// Start a session in the background. The receiver yields progress events
    /// followed by exactly one `done` or `error`. Dropping it detaches the
    /// session: the process is killed and staged images are removed.
    pub fn start(&self, request_id: String, input: ChatInput) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let bridge = self.clone();
        tokio::spawn(async move {
            bridge.run_session(request_id, input, tx).await;
        });
        rx
    }

    /// Run a session to completion without streaming. Progress events are
    /// handed to `on_progress`; the result is the `done` content or the
    /// `error` message.
    pub async fn ask(
        &self,
        input: ChatInput,
        mut on_progress: impl FnMut(&StreamEvent),
    ) -> Result<String, String> {
        let mut rx = self.start(super::process::new_request_id(), input);
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Done { content, .. } => return Ok(content),
                StreamEvent::Error { message } => return Err(message),
                other => on_progress(&other),
            }
        }
        Err(super::error::GENERIC_ERROR_MESSAGE.to_string())
    }

    async fn run_session(self, request_id: String, input: ChatInput, tx: mpsc::Sender<StreamEvent>) {
        let image_paths = self.staging.stage_all(&input.images).await;
        let prompt = prompt::build_prompt(&input.message, &input.history, &image_paths);
        tracing::debug!(
            request_id = %request_id,
            images = image_paths.len(),
            history = input.history.len(),
            "starting session"
        );

        let mut state = SessionState::default();
        let outcome = self.drive(&request_id, &prompt, &mut state, &tx).await;

        let terminal = match outcome {
            Ok(Outcome::Completed) => StreamEvent::Done {
                content: state.final_content(),
                image_paths: (!image_paths.is_empty()).then(|| path_strings(&image_paths)),
            },
            Ok(Outcome::Detached) => {
                tracing::info!(request_id = %request_id, "session detached by client");
                ImageStaging::cleanup(&image_paths).await;
                return;
            }
            Err(e) => {
                match e {
                    BridgeError::Timeout => tracing::warn!(request_id = %request_id, "session timed out"),
                    ref e => tracing::error!(request_id = %request_id, error = %e, "session failed"),
                }
                ImageStaging::cleanup(&image_paths).await;
                StreamEvent::Error { message: e.user_message() }
            }
        };

        if tx.send(terminal).await.is_err() {
            tracing::debug!(request_id = %request_id, "client gone before terminal event");
        }
    }

    async fn drive(
        &self,
        request_id: &str,
        prompt: &str,
        state: &mut SessionState,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Outcome, BridgeError> {
        let deadline = Instant::now() + self.timeout;

        let spawned = timeout_at(
            deadline,
            ClaudeProcess::spawn(&self.command, prompt, request_id, &self.registry),
        )
        .await;
        let mut process = match spawned {
            Ok(result) => result?,
            Err(_) => return Err(BridgeError::Timeout),
        };

        if tx.is_closed() {
            process.terminate();
            return Ok(Outcome::Detached);
        }

        let mut stdout = process.take_stdout().ok_or(BridgeError::MissingStdout)?;
        let mut lines = LineBuffer::default();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                read = timeout_at(deadline, stdout.read(&mut chunk)) => read,
                () = tx.closed() => {
                    process.terminate();
                    return Ok(Outcome::Detached);
                }
            };
            let n = match read {
                Ok(read) => read.map_err(BridgeError::Read)?,
                Err(_) => {
                    process.terminate();
                    return Err(BridgeError::Timeout);
                }
            };

            let completed = if n == 0 {
                lines.finish().into_iter().collect()
            } else {
                lines.push(&chunk[..n])
            };

            for line in completed {
                for record in protocol::parse_line(&line) {
                    let Some(event) = state.apply(record) else {
                        continue;
                    };
                    match timeout_at(deadline, tx.send(event)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => {
                            process.terminate();
                            return Ok(Outcome::Detached);
                        }
                        Err(_) => {
                            process.terminate();
                            return Err(BridgeError::Timeout);
                        }
                    }
                }
            }

            if n == 0 {
                break;
            }
        }

        let waited = tokio::select! {
            waited = timeout_at(deadline, process.wait()) => waited,
            () = tx.closed() => {
                process.terminate();
                return Ok(Outcome::Detached);
            }
        };
        let status = match waited {
            Ok(status) => status.map_err(BridgeError::Wait)?,
            Err(_) => {
                process.terminate();
                return Err(BridgeError::Timeout);
            }
        };

        let pid = process.pid();
        let released = process.finish(self.reap_delay);
        if !released || tx.is_closed() {
            return Ok(Outcome::Detached);
        }
        if !status.success() {
            tracing::warn!(request_id, ?pid, %status, "assistant exited unsuccessfully");
        }
        Ok(Outcome::Completed)
    }
}

fn path_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}
