use std::io;

/// Shown to the user when a session exceeds its wall-clock budget.
pub const TIMEOUT_MESSAGE: &str =
    "Request timed out (10 minutes). Please try again with a simpler question.";

/// Used when an error has nothing useful to say.
pub const GENERIC_ERROR_MESSAGE: &str = "Sorry, there was an error connecting to Claude.";

/// Faults that end a session with an `error` event.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write prompt to assistant: {0}")]
    Stdin(#[source] io::Error),

    #[error("assistant process has no stdout")]
    MissingStdout,

    #[error("failed to read assistant output: {0}")]
    Read(#[source] io::Error),

    #[error("failed to wait for assistant process: {0}")]
    Wait(#[source] io::Error),

    #[error("{TIMEOUT_MESSAGE}")]
    Timeout,
}

impl BridgeError {
    /// Message carried by the session's `error` event.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }
}
