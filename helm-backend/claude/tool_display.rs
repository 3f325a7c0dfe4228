//! Friendly names and icons for tool calls.
//!
//! Everything here is table data. Supporting a new integration means adding a
//! [`ToolRule`] (and maybe an action table), never touching [`describe`].

use serde_json::{Map, Value};

const DEFAULT_ICON: &str = "🔧";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDisplay {
    pub friendly_name: String,
    pub icon: &'static str,
}

enum Pattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl Pattern {
    /// Returns the action part of the tool name and a specificity score.
    fn matches<'a>(&self, tool_name: &'a str) -> Option<(&'a str, usize)> {
        match self {
            Pattern::Exact(name) => (tool_name == *name).then_some((tool_name, usize::MAX)),
            Pattern::Prefix(prefix) => tool_name
                .strip_prefix(prefix)
                .map(|action| (action, prefix.len())),
        }
    }
}

enum Label {
    Fixed(&'static str),
    /// Uses a string field from the input when present.
    Field {
        key: &'static str,
        with: fn(&str) -> String,
        without: &'static str,
    },
    /// Receives the action (tool name minus the namespace prefix) and input.
    Custom(fn(&str, &Value) -> String),
}

impl Label {
    fn render(&self, action: &str, input: &Value) -> String {
        match self {
            Label::Fixed(text) => (*text).to_string(),
            Label::Field { key, with, without } => match str_field(input, key) {
                Some(value) => with(value),
                None => (*without).to_string(),
            },
            Label::Custom(render) => render(action, input),
        }
    }
}

struct ToolRule {
    pattern: Pattern,
    icon: &'static str,
    label: Label,
}

const fn exact(name: &'static str, icon: &'static str, label: Label) -> ToolRule {
    ToolRule { pattern: Pattern::Exact(name), icon, label }
}

const fn prefix(prefix: &'static str, icon: &'static str, label: Label) -> ToolRule {
    ToolRule { pattern: Pattern::Prefix(prefix), icon, label }
}

static RULES: &[ToolRule] = &[
    // MCP integrations
    prefix("mcp__calendar__", "📅", Label::Custom(calendar_label)),
    prefix("mcp__gmail__", "📧", Label::Custom(email_label)),
    prefix("mcp__gmail-personal__", "📧", Label::Custom(email_label)),
    prefix("mcp__slack__", "💬", Label::Custom(slack_label)),
    prefix("mcp__plugin_playwright", "🌐", Label::Custom(browser_label)),
    // Built-in tools
    exact(
        "Read",
        "📄",
        Label::Field { key: "file_path", with: |p| format!("Reading: {}", file_name(p)), without: "Reading file" },
    ),
    exact(
        "Write",
        "✏️",
        Label::Field { key: "file_path", with: |p| format!("Writing: {}", file_name(p)), without: "Writing file" },
    ),
    exact(
        "Edit",
        "📝",
        Label::Field { key: "file_path", with: |p| format!("Editing: {}", file_name(p)), without: "Editing file" },
    ),
    exact(
        "Glob",
        "🔎",
        Label::Field { key: "pattern", with: |p| format!("Glob: {}", truncate(p, 30)), without: "Searching files" },
    ),
    exact(
        "Grep",
        "🔍",
        Label::Field { key: "pattern", with: |p| format!("Grep: {}", truncate(p, 30)), without: "Searching content" },
    ),
    exact(
        "Bash",
        "💻",
        Label::Field { key: "command", with: |c| format!("Running: {}", truncate(c, 35)), without: "Running command" },
    ),
    exact(
        "WebSearch",
        "🌐",
        Label::Field { key: "query", with: |q| format!("Searching: \"{}\"", truncate(q, 30)), without: "Searching web" },
    ),
    exact(
        "WebFetch",
        "🌐",
        Label::Field { key: "url", with: |u| format!("Fetching: {}", truncate(u, 35)), without: "Fetching webpage" },
    ),
    exact(
        "Task",
        "🤖",
        Label::Field { key: "description", with: |d| format!("Agent: {}", truncate(d, 35)), without: "Running agent" },
    ),
    exact("TodoWrite", "✅", Label::Fixed("Updating todos")),
    exact("AskUserQuestion", "❓", Label::Fixed("Asking question")),
];

static SLACK_ACTIONS: &[(&str, Label)] = &[
    ("list_channels", Label::Fixed("Listing channels")),
    (
        "get_channel_history",
        Label::Field { key: "channel", with: |c| format!("Reading #{}", truncate(c, 20)), without: "Reading channel" },
    ),
    ("get_thread_replies", Label::Fixed("Reading thread replies")),
    (
        "post_message",
        Label::Field { key: "channel", with: |c| format!("Posting to #{}", truncate(c, 20)), without: "Posting message" },
    ),
    ("reply_to_thread", Label::Fixed("Replying to thread")),
    (
        "add_reaction",
        Label::Field { key: "emoji", with: |e| format!("Reacting with :{e}:"), without: "Adding reaction" },
    ),
    ("get_users", Label::Fixed("Getting users")),
    ("get_user_profile", Label::Fixed("Getting user profile")),
    (
        "search_messages",
        Label::Field { key: "query", with: |q| format!("Searching: \"{}\"", truncate(q, 25)), without: "Searching messages" },
    ),
    ("list_workspaces", Label::Fixed("Listing workspaces")),
    ("get_workspace_info", Label::Fixed("Getting workspace info")),
];

static BROWSER_ACTIONS: &[(&str, Label)] = &[
    (
        "browser_navigate",
        Label::Field { key: "url", with: |u| format!("Navigating → {}", host(u)), without: "Navigating" },
    ),
    (
        "browser_click",
        Label::Field { key: "element", with: |e| format!("Clicking: {}", truncate(e, 35)), without: "Clicking element" },
    ),
    (
        "browser_type",
        Label::Field { key: "text", with: |t| format!("Typing: \"{}\"", truncate(t, 25)), without: "Typing text" },
    ),
    ("browser_snapshot", Label::Fixed("Reading page content")),
    ("browser_take_screenshot", Label::Fixed("Taking screenshot")),
    ("browser_close", Label::Fixed("Closing browser")),
    (
        "browser_hover",
        Label::Field { key: "element", with: |e| format!("Hovering: {}", truncate(e, 35)), without: "Hovering" },
    ),
    (
        "browser_select_option",
        Label::Field { key: "element", with: |e| format!("Selecting: {}", truncate(e, 35)), without: "Selecting option" },
    ),
    ("browser_fill_form", Label::Fixed("Filling form fields")),
    (
        "browser_press_key",
        Label::Field { key: "key", with: |k| format!("Pressing key: {k}"), without: "Pressing key" },
    ),
    (
        "browser_wait_for",
        Label::Field { key: "text", with: |t| format!("Waiting for: \"{}\"", truncate(t, 25)), without: "Waiting" },
    ),
    (
        "browser_tabs",
        Label::Field { key: "action", with: |a| format!("Tabs: {a}"), without: "Managing tabs" },
    ),
    ("browser_evaluate", Label::Fixed("Running JavaScript")),
    ("browser_console_messages", Label::Fixed("Reading console logs")),
    ("browser_network_requests", Label::Fixed("Reading network requests")),
    ("browser_resize", Label::Fixed("Resizing browser")),
    ("browser_install", Label::Fixed("Installing browser")),
    ("browser_handle_dialog", Label::Fixed("Handling dialog")),
    ("browser_file_upload", Label::Fixed("Uploading file")),
    ("browser_drag", Label::Fixed("Dragging element")),
    ("browser_navigate_back", Label::Fixed("Going back")),
    ("browser_run_code", Label::Fixed("Running Playwright code")),
];

/// Resolve the friendly label and icon for a tool call.
pub fn describe(tool_name: &str, input: &Value) -> ToolDisplay {
    let best = RULES
        .iter()
        .filter_map(|rule| rule.pattern.matches(tool_name).map(|(action, score)| (rule, action, score)))
        .max_by_key(|(_, _, score)| *score);

    match best {
        Some((rule, action, _)) => ToolDisplay {
            friendly_name: rule.label.render(action, input),
            icon: rule.icon,
        },
        None => ToolDisplay {
            friendly_name: tool_name.to_string(),
            icon: DEFAULT_ICON,
        },
    }
}

/// Trim the tool input down to what the UI shows next to the label.
pub fn display_input(tool_name: &str, input: &Value) -> Value {
    let projected = match tool_name {
        "Read" => str_field(input, "file_path").map(|p| ("file", file_name(p).to_string())),
        "WebSearch" => str_field(input, "query").map(|q| ("query", q.to_string())),
        "Grep" => str_field(input, "pattern").map(|p| ("pattern", p.to_string())),
        _ => None,
    };

    match projected {
        Some((key, value)) => {
            let mut map = Map::new();
            map.insert(key.to_string(), Value::String(value));
            Value::Object(map)
        }
        None => input.clone(),
    }
}

fn calendar_label(action: &str, input: &Value) -> String {
    format!("Calendar: {}{}", action.replace('-', " "), account_suffix(input))
}

fn email_label(action: &str, input: &Value) -> String {
    format!("Email: {}{}", action.replace('_', " "), account_suffix(input))
}

fn slack_label(action: &str, input: &Value) -> String {
    lookup_action(SLACK_ACTIONS, action, input)
        .unwrap_or_else(|| format!("Slack: {}", action.replace('_', " ")))
}

fn browser_label(action: &str, input: &Value) -> String {
    let action = action.strip_prefix("_playwright__").unwrap_or(action);
    lookup_action(BROWSER_ACTIONS, action, input)
        .unwrap_or_else(|| format!("Browser: {}", action.replace('_', " ")))
}

fn lookup_action(table: &[(&str, Label)], action: &str, input: &Value) -> Option<String> {
    table
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, label)| label.render(action, input))
}

fn account_suffix(input: &Value) -> String {
    match input.get("account") {
        Some(Value::String(s)) if !s.is_empty() => format!(" ({s})"),
        Some(Value::Number(n)) => format!(" ({n})"),
        _ => String::new(),
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Char-safe truncation with a `...` suffix.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn host(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
        Err(_) => truncate(raw, 30),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn label(name: &str, input: Value) -> (String, &'static str) {
        let d = describe(name, &input);
        (d.friendly_name, d.icon)
    }

    #[test]
    fn read_uses_file_basename() {
        assert_eq!(
            label("Read", json!({"file_path": "/home/me/notes/todo.md"})),
            ("Reading: todo.md".to_string(), "📄")
        );
        assert_eq!(label("Read", json!({})), ("Reading file".to_string(), "📄"));
    }

    #[test]
    fn bash_command_is_truncated() {
        let cmd = "cargo test --workspace --all-features -- --nocapture";
        let (name, icon) = label("Bash", json!({"command": cmd}));
        assert_eq!(name, "Running: cargo test --workspace --all-featur...");
        assert_eq!(icon, "💻");
    }

    #[test]
    fn web_search_quotes_query() {
        assert_eq!(
            label("WebSearch", json!({"query": "rust sse"})).0,
            "Searching: \"rust sse\""
        );
    }

    #[test]
    fn calendar_includes_account() {
        assert_eq!(
            label("mcp__calendar__list-events", json!({"account": "work"})),
            ("Calendar: list events (work)".to_string(), "📅")
        );
    }

    #[test]
    fn both_gmail_namespaces_map_to_email() {
        assert_eq!(
            label("mcp__gmail__search_emails", json!({})),
            ("Email: search emails".to_string(), "📧")
        );
        assert_eq!(
            label("mcp__gmail-personal__send_email", json!({"account": "me"})),
            ("Email: send email (me)".to_string(), "📧")
        );
    }

    #[test]
    fn slack_known_and_unknown_actions() {
        assert_eq!(
            label("mcp__slack__get_channel_history", json!({"channel": "engineering-announcements"})).0,
            "Reading #engineering-announce..."
        );
        assert_eq!(
            label("mcp__slack__add_reaction", json!({"emoji": "tada"})).0,
            "Reacting with :tada:"
        );
        assert_eq!(
            label("mcp__slack__archive_channel", json!({})),
            ("Slack: archive channel".to_string(), "💬")
        );
    }

    #[test]
    fn playwright_navigate_shows_host() {
        assert_eq!(
            label(
                "mcp__plugin_playwright_playwright__browser_navigate",
                json!({"url": "https://docs.rs/axum/latest"})
            ),
            ("Navigating → docs.rs".to_string(), "🌐")
        );
        assert_eq!(
            label("mcp__plugin_playwright_playwright__browser_navigate", json!({"url": "not a url"})).0,
            "Navigating → not a url"
        );
        assert_eq!(
            label("mcp__plugin_playwright_playwright__browser_zoom", json!({})).0,
            "Browser: browser zoom"
        );
    }

    #[test]
    fn unknown_tool_falls_back_to_wrench() {
        assert_eq!(
            label("mcp__weather__forecast", json!({})),
            ("mcp__weather__forecast".to_string(), "🔧")
        );
    }

    #[test]
    fn exact_name_never_matches_as_prefix() {
        assert_eq!(label("ReadMany", json!({})).1, DEFAULT_ICON);
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("short", 20), "short");
    }

    #[test]
    fn display_input_projects_known_tools() {
        assert_eq!(
            display_input("Read", &json!({"file_path": "/a/b/c.txt", "limit": 10})),
            json!({"file": "c.txt"})
        );
        assert_eq!(
            display_input("Grep", &json!({"pattern": "fn main", "path": "src"})),
            json!({"pattern": "fn main"})
        );
        let bash = json!({"command": "ls"});
        assert_eq!(display_input("Bash", &bash), bash);
    }
}
