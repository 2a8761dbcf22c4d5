use std::env;

use serde::Deserialize;
use tracing::info;

use crate::types::Credential;

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credentials used to seed the credential store. May be empty when a
    /// deployment loads credentials from storage instead.
    pub credentials: Vec<Credential>,
    /// Egress proxy URLs, comma-separated in the environment.
    pub proxy_urls: Vec<String>,
    /// Whether requests may go out without a proxy when none is healthy.
    pub allow_direct: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_followings_per_user: usize,
    pub worker_poll_secs: u64,
    pub log_level: String,
    pub log_format: String,
}

#[derive(Deserialize)]
struct RawCredential {
    id: Option<String>,
    bearer_token: String,
    csrf_token: String,
    session_token: String,
}

impl Config {
    pub fn from_env() -> Self {
        let credentials = match env::var("SPINDLE_CREDENTIALS") {
            Ok(raw) => parse_credentials(&raw),
            Err(_) => Vec::new(),
        };

        let proxy_urls = env::var("SPINDLE_PROXY_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            credentials,
            proxy_urls,
            allow_direct: env::var("SPINDLE_ALLOW_DIRECT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            request_timeout_secs: parsed_env("SPINDLE_REQUEST_TIMEOUT_SECS", 30),
            max_retries: parsed_env("SPINDLE_MAX_RETRIES", 3),
            max_followings_per_user: parsed_env("SPINDLE_MAX_FOLLOWINGS_PER_USER", 500),
            worker_poll_secs: parsed_env("SPINDLE_WORKER_POLL_SECS", 2),
            log_level: env::var("SPINDLE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("SPINDLE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        }
    }

    /// Log a boot summary without exposing secrets.
    pub fn log_redacted(&self) {
        info!(
            credentials = self.credentials.len(),
            proxies = self.proxy_urls.len(),
            allow_direct = self.allow_direct,
            max_followings_per_user = self.max_followings_per_user,
            "Config loaded"
        );
    }
}

/// Parse the credential JSON array. Entries without an id get a positional
/// one so pool logs and mutation counters stay addressable.
fn parse_credentials(raw: &str) -> Vec<Credential> {
    let parsed: Vec<RawCredential> = serde_json::from_str(raw)
        .unwrap_or_else(|e| panic!("SPINDLE_CREDENTIALS is not valid JSON: {e}"));

    parsed
        .into_iter()
        .enumerate()
        .map(|(i, c)| Credential {
            id: c.id.unwrap_or_else(|| format!("credential-{i}")),
            bearer_token: c.bearer_token,
            csrf_token: c.csrf_token,
            session_token: c.session_token,
        })
        .collect()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
