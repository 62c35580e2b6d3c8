use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
/// Reference cadence of the quote refresh.
pub const POLL_INTERVAL_MS: u64 = 15_000;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Key under which the session identifier is persisted.
pub const SESSION_KEY: &str = "userId";
pub const DEFAULT_SESSION_FILE: &str = ".cache/session.json";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub session_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_url = lookup("TICKERWATCH_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_url);

        let poll_interval = parse_millis(lookup("TICKERWATCH_POLL_INTERVAL_MS"), "TICKERWATCH_POLL_INTERVAL_MS")
            .unwrap_or(defaults.poll_interval);

        let request_timeout = lookup("TICKERWATCH_REQUEST_TIMEOUT_SECS")
            .and_then(|v| match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    warn!("Ignoring invalid TICKERWATCH_REQUEST_TIMEOUT_SECS={}", v);
                    None
                }
            })
            .unwrap_or(defaults.request_timeout);

        let session_file = lookup("TICKERWATCH_SESSION_FILE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.session_file);

        Self {
            api_url,
            poll_interval,
            request_timeout,
            session_file,
        }
    }

    pub fn with_overrides(mut self, api_url: Option<String>, poll_interval_ms: Option<u64>) -> Self {
        if let Some(url) = api_url {
            let trimmed = url.trim().trim_end_matches('/');
            if !trimmed.is_empty() {
                self.api_url = trimmed.to_string();
            }
        }
        if let Some(ms) = poll_interval_ms.filter(|ms| *ms > 0) {
            self.poll_interval = Duration::from_millis(ms);
        }
        self
    }
}

fn parse_millis(raw: Option<String>, key: &str) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!("Ignoring invalid {}={} ; using default cadence", key, raw);
            None
        }
    }
}
