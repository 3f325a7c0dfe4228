pub mod bridge;
pub mod error;
pub mod events;
pub mod process;
pub mod prompt;
pub mod protocol;
pub mod tool_display;

pub use bridge::{Bridge, ChatInput};
pub use error::BridgeError;
pub use events::StreamEvent;
pub use process::{ClaudeCommand, ProcessRegistry};
