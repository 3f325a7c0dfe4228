use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sentry_dsn: Option<String>,
    pub environment: String,
    /// Executable used for the assistant subprocess.
    pub claude_bin: String,
    /// Working directory handed to every assistant subprocess.
    pub project_root: PathBuf,
    pub max_turns: u32,
    pub request_timeout: Duration,
    /// Staged uploads older than this are removed by the sweeper.
    pub upload_max_age: Duration,
    pub static_dir: Option<PathBuf>,
}

/// Raw, unparsed values as they come from the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawConfig<'a> {
    pub port: Option<&'a str>,
    pub sentry_dsn: Option<&'a str>,
    pub environment: Option<&'a str>,
    pub claude_bin: Option<&'a str>,
    pub project_root: Option<&'a str>,
    pub max_turns: Option<&'a str>,
    pub request_timeout_secs: Option<&'a str>,
    pub upload_max_age_secs: Option<&'a str>,
    pub static_dir: Option<&'a str>,
}

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_MAX_TURNS: u32 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10 * 60;
const DEFAULT_UPLOAD_MAX_AGE_SECS: u64 = 60 * 60;

impl Config {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok();
        let port = var("PORT");
        let sentry_dsn = var("SENTRY_DSN");
        let environment = var("ENVIRONMENT");
        let claude_bin = var("CLAUDE_BIN");
        let project_root = var("PROJECT_ROOT");
        let max_turns = var("CLAUDE_MAX_TURNS");
        let request_timeout_secs = var("REQUEST_TIMEOUT_SECS");
        let upload_max_age_secs = var("UPLOAD_MAX_AGE_SECS");
        let static_dir = var("STATIC_DIR");

        Self::from_raw_values(RawConfig {
            port: port.as_deref(),
            sentry_dsn: sentry_dsn.as_deref(),
            environment: environment.as_deref(),
            claude_bin: claude_bin.as_deref(),
            project_root: project_root.as_deref(),
            max_turns: max_turns.as_deref(),
            request_timeout_secs: request_timeout_secs.as_deref(),
            upload_max_age_secs: upload_max_age_secs.as_deref(),
            static_dir: static_dir.as_deref(),
        })
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(raw: RawConfig<'_>) -> Self {
        let non_empty = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        let port = raw.port.and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);

        let max_turns = raw
            .max_turns
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_TURNS);

        let request_timeout = raw
            .request_timeout_secs
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let upload_max_age = raw
            .upload_max_age_secs
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_UPLOAD_MAX_AGE_SECS));

        let project_root = non_empty(raw.project_root)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Config {
            port,
            sentry_dsn: non_empty(raw.sentry_dsn),
            environment: non_empty(raw.environment).unwrap_or_else(|| "local".to_string()),
            claude_bin: non_empty(raw.claude_bin).unwrap_or_else(|| "claude".to_string()),
            project_root,
            max_turns,
            request_timeout,
            upload_max_age,
            static_dir: non_empty(raw.static_dir).map(PathBuf::from),
        }
    }
}
