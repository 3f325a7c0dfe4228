use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard cap on the user's message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;
/// Only the most recent history entries are replayed into the prompt.
pub const HISTORY_WINDOW: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior turn supplied by the client. Never stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_paths: Option<Vec<String>>,
}

/// Strip characters the shell would interpret and cap the length.
pub fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .filter(|c| !matches!(c, '`' | '$' | '\\'))
        .take(MAX_MESSAGE_CHARS)
        .collect()
}

/// `[Current time: Monday, October 19, 2026 at 3:04 PM +02:00]`
pub fn time_context<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "[Current time: {}]\n\n",
        now.format("%A, %B %-d, %Y at %-I:%M %p %Z")
    )
}

fn history_context(history: &[ConversationEntry]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut out = String::from("[Previous conversation:]\n");
    for entry in &history[start..] {
        let role = match entry.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&entry.content);
        if let Some(paths) = entry.image_paths.as_ref().filter(|p| !p.is_empty()) {
            out.push_str(&format!(" [Images available: {}]", paths.join(", ")));
        }
        out.push_str("\n\n");
    }
    out.push_str("[Current message:]\n");
    out
}

fn image_instructions(image_paths: &[PathBuf]) -> String {
    if image_paths.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "\n\n[The user has attached the following image(s). Please read and analyze them using the Read tool:]\n",
    );
    for path in image_paths {
        out.push_str(&format!("- {}\n", path.display()));
    }
    out.push('\n');
    out
}

/// Assemble the full prompt written to the assistant's stdin.
pub fn build_prompt_at<Tz: TimeZone>(
    now: &DateTime<Tz>,
    message: &str,
    history: &[ConversationEntry],
    image_paths: &[PathBuf],
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let mut prompt = time_context(now);
    prompt.push_str(&history_context(history));
    prompt.push_str(&sanitize_message(message));
    prompt.push_str(&image_instructions(image_paths));
    prompt
}

pub fn build_prompt(message: &str, history: &[ConversationEntry], image_paths: &[PathBuf]) -> String {
    build_prompt_at(&Local::now(), message, history, image_paths)
}
