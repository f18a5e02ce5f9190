use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL for processing records
    pub database_url: String,
    /// Base URL of the similarity service; unset means processing always fails
    pub similarity_url: Option<String>,
    /// Bearer token sent to the similarity service
    pub similarity_token: Option<String>,
    /// Upper bound on one remote upsert call
    pub remote_timeout: Duration,
    /// Stability window before a content change is emitted
    pub debounce: Duration,
    /// Last assistant message must be longer than this (trimmed, in chars)
    pub min_assistant_chars: usize,
    /// JSON transcript the observer watches
    pub document_path: Option<PathBuf>,
    /// How often the transcript file is re-read
    pub document_poll: Duration,
    /// Address the UI adapter listens on
    pub bind: String,
    /// Process automatically when the active conversation settles
    pub auto_process: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./data/convo-sync.db".to_string(),
            similarity_url: None,
            similarity_token: None,
            remote_timeout: Duration::from_millis(30_000),
            debounce: Duration::from_millis(750),
            min_assistant_chars: 1,
            document_path: None,
            document_poll: Duration::from_millis(250),
            bind: "127.0.0.1:8787".to_string(),
            auto_process: true,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            database_url: env_str("CONVO_SYNC_DATABASE_URL", &defaults.database_url),
            similarity_url: env_opt("CONVO_SYNC_SIMILARITY_URL"),
            similarity_token: env_opt("CONVO_SYNC_SIMILARITY_TOKEN"),
            remote_timeout: Duration::from_millis(env_parse(
                "CONVO_SYNC_REMOTE_TIMEOUT_MS",
                30_000,
            )?),
            debounce: Duration::from_millis(env_parse("CONVO_SYNC_DEBOUNCE_MS", 750)?),
            min_assistant_chars: env_parse(
                "CONVO_SYNC_MIN_ASSISTANT_CHARS",
                defaults.min_assistant_chars,
            )?,
            document_path: env_opt("CONVO_SYNC_DOCUMENT_PATH").map(PathBuf::from),
            document_poll: Duration::from_millis(env_parse("CONVO_SYNC_DOCUMENT_POLL_MS", 250)?),
            bind: env_str("CONVO_SYNC_BIND", &defaults.bind),
            auto_process: env_bool("CONVO_SYNC_AUTO_PROCESS", defaults.auto_process)?,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(val) => parse_bool(&val)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse env var {key}={val}: expected a boolean")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_env_parse_reports_bad_values() {
        std::env::set_var("CONVO_SYNC_TEST_BAD_NUMBER", "soon");
        let err = env_parse::<u64>("CONVO_SYNC_TEST_BAD_NUMBER", 5).unwrap_err();
        assert!(err.to_string().contains("CONVO_SYNC_TEST_BAD_NUMBER=soon"));
        assert_eq!(env_parse::<u64>("CONVO_SYNC_TEST_UNSET_NUMBER", 5).unwrap(), 5);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.min_assistant_chars, 1);
        assert_eq!(config.debounce, Duration::from_millis(750));
        assert!(config.auto_process);
        assert!(config.similarity_url.is_none());
    }
}
