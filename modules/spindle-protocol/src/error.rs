use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Error taxonomy for the protocol client.
///
/// Callers branch on the variant: `Authentication` means the credential is
/// bad or banned (rotate, never retry with the same one), `RateLimited`
/// carries how long to wait, `Scraping` covers everything the remote said
/// no to. Transport and decode failures keep their own variants so retry
/// logic can tell them apart.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        credential_id: Option<String>,
    },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Scrape failed: {message}")]
    Scraping {
        message: String,
        status: Option<u16>,
        /// Application-level error code from the response body, when present.
        code: Option<u32>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            credential_id: None,
        }
    }

    pub fn scraping(message: impl Into<String>) -> Self {
        Self::Scraping {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn scraping_status(message: impl Into<String>, status: u16) -> Self {
        Self::Scraping {
            message: message.into(),
            status: Some(status),
            code: None,
        }
    }

    pub fn scraping_code(message: impl Into<String>, code: u32) -> Self {
        Self::Scraping {
            message: message.into(),
            status: None,
            code: Some(code),
        }
    }

    /// Whether retrying the same request (same credential) can succeed.
    /// Transport failures and server errors qualify; everything else needs
    /// rotation, waiting, or is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Scraping {
                status: Some(s), ..
            } => *s >= 500,
            _ => false,
        }
    }

    /// Whether the unit of work is unrecoverable no matter which credential
    /// retries it (not-found, suspended, duplicate, spam-flagged).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Scraping {
                code: Some(34 | 50 | 63 | 187 | 226 | 385),
                ..
            }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ClientError::Network("reset".into()).is_retryable());
        assert!(ClientError::scraping_status("server error", 502).is_retryable());
        assert!(!ClientError::scraping_status("bad request", 400).is_retryable());
        assert!(!ClientError::authentication("expired").is_retryable());
        assert!(!ClientError::RateLimited { retry_after_secs: 900 }.is_retryable());
    }

    #[test]
    fn terminal_codes() {
        assert!(ClientError::scraping_code("User has been suspended", 63).is_terminal());
        assert!(ClientError::scraping_code("not found", 34).is_terminal());
        assert!(!ClientError::scraping_status("server error", 503).is_terminal());
    }

    #[test]
    fn rate_limited_carries_wait() {
        let err = ClientError::RateLimited { retry_after_secs: 120 };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
        assert_eq!(ClientError::scraping("x").retry_after(), None);
    }
}
