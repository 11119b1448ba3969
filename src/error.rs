use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

/// Error category shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Parse,
    NotFound,
    Auth,
    RateLimit,
    Server,
    Network,
    Timeout,
    Validation,
    Config,
    Provider,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Parse => "PARSE_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Auth => "AUTH_ERROR",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::Server => "SERVER_ERROR",
            ErrorCode::Network => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::Config => "CONFIG_ERROR",
            ErrorCode::Provider => "PROVIDER_ERROR",
        }
    }

    /// Whether an error of this category may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimit | ErrorCode::Server | ErrorCode::Network | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and when an error happened
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub operation: String,
    pub provider: Option<String>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Structured error returned by all core components.
///
/// `recoverable == false` errors (bad credentials, malformed requests) must be surfaced
/// directly and never retried.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub message: String,
    pub code: ErrorCode,
    pub context: ErrorContext,
    pub recoverable: bool,
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Longest upstream body excerpt kept in error details
const MAX_DETAIL_CHARS: usize = 500;

/// Longest pause between retry attempts
const MAX_BACKOFF_MS: u64 = 30_000;

impl AppError {
    pub fn new(code: ErrorCode, operation: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            context: ErrorContext {
                operation: operation.to_string(),
                provider: None,
                details: None,
                timestamp: Utc::now(),
            },
            recoverable: code.is_recoverable(),
        }
    }

    pub fn parse(operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Parse, operation, message)
    }

    pub fn not_found(operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, operation, message)
    }

    pub fn validation(operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, operation, message)
    }

    pub fn config(operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, operation, message)
    }

    pub fn provider(operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Provider, operation, message)
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.context.provider = Some(provider.to_string());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details: String = details.into();
        let details = if details.chars().count() > MAX_DETAIL_CHARS {
            let cut: String = details.chars().take(MAX_DETAIL_CHARS).collect();
            format!("{cut}…")
        } else {
            details
        };
        self.context.details = Some(details);
        self
    }

    /// Categorize a non-success HTTP status
    pub fn from_status(status: u16, body: &str, operation: &str) -> Self {
        let err = match status {
            401 | 403 => Self::new(
                ErrorCode::Auth,
                operation,
                format!("Authentication failed (HTTP {status}): API key invalid or lacks permission"),
            ),
            429 => Self::new(
                ErrorCode::RateLimit,
                operation,
                "Rate limit exceeded (HTTP 429): too many requests, wait before retrying",
            ),
            500..=599 => Self::new(
                ErrorCode::Server,
                operation,
                format!("Upstream server error (HTTP {status})"),
            ),
            _ => Self::provider(operation, format!("Request failed with HTTP {status}: {}", body.trim())),
        };
        if body.trim().is_empty() { err } else { err.with_details(body.trim()) }
    }

    /// Categorize a transport-level failure from the HTTP client
    pub fn from_transport(err: &reqwest::Error, operation: &str) -> Self {
        if err.is_timeout() {
            return Self::new(ErrorCode::Timeout, operation, format!("Request timed out: {err}"));
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), "", operation);
        }
        if err.is_connect() || err.is_request() {
            return Self::new(
                ErrorCode::Network,
                operation,
                format!("Could not connect to the server: {err}"),
            );
        }
        if err.is_decode() {
            return Self::parse(operation, format!("Could not decode response: {err}"));
        }
        Self::provider(operation, err.to_string())
    }

    /// Actionable text for end users
    pub fn user_message(&self) -> String {
        let hint = match self.code {
            ErrorCode::Auth => "API key invalid or missing. Check the provider settings.",
            ErrorCode::RateLimit => "Rate limit reached. Wait a minute and try again.",
            ErrorCode::Server => "The provider is having problems. Try again later.",
            ErrorCode::Network => "Network connection failed. Check your connection or the base URL.",
            ErrorCode::Timeout => "The request timed out. Try again or raise the timeout.",
            ErrorCode::Validation => "The request was rejected before sending. Check the model and parameters.",
            ErrorCode::Config => "The provider configuration is incomplete.",
            ErrorCode::Parse | ErrorCode::NotFound | ErrorCode::Provider => "",
        };
        let prefix = match &self.context.provider {
            Some(p) => format!("[{p}] "),
            None => String::new(),
        };
        if hint.is_empty() {
            format!("{prefix}{}", self.message)
        } else {
            format!("{prefix}{hint} ({})", self.message)
        }
    }
}

/// 500 ms doubled per attempt, capped at [`MAX_BACKOFF_MS`]
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 500u64.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

/// Retry an async operation with exponential backoff, but only while it fails recoverably
pub async fn retry_recoverable<F, Fut, T>(max_attempts: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if e.recoverable && attempt + 1 < max_attempts => {
                let delay = backoff_delay(attempt);
                debug!("Attempt {} failed ({}): {e}, retrying in {delay:?}", attempt + 1, e.code);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_status_categories() {
        assert_eq!(AppError::from_status(401, "", "op").code, ErrorCode::Auth);
        assert_eq!(AppError::from_status(403, "", "op").code, ErrorCode::Auth);
        assert_eq!(AppError::from_status(429, "", "op").code, ErrorCode::RateLimit);
        assert_eq!(AppError::from_status(500, "", "op").code, ErrorCode::Server);
        assert_eq!(AppError::from_status(503, "", "op").code, ErrorCode::Server);
        assert_eq!(AppError::from_status(404, "", "op").code, ErrorCode::Provider);
    }

    #[test]
    fn test_generic_status_preserves_message() {
        let err = AppError::from_status(418, "model is a teapot", "chat");
        assert!(err.message.contains("model is a teapot"));
        assert_eq!(err.context.details.as_deref(), Some("model is a teapot"));
        assert_eq!(err.context.operation, "chat");
    }

    #[test]
    fn test_recoverable_flags() {
        assert!(!AppError::from_status(401, "", "op").recoverable);
        assert!(AppError::from_status(429, "", "op").recoverable);
        assert!(AppError::from_status(502, "", "op").recoverable);
        assert!(!AppError::validation("op", "bad").recoverable);
        assert!(AppError::new(ErrorCode::Timeout, "op", "slow").recoverable);
    }

    #[test]
    fn test_details_truncated() {
        let err = AppError::provider("op", "x").with_details("a".repeat(2000));
        let details = err.context.details.unwrap();
        assert_eq!(details.chars().count(), MAX_DETAIL_CHARS + 1);
    }

    #[test]
    fn test_user_message_auth() {
        let err = AppError::from_status(401, "", "chat").with_provider("openai");
        let msg = err.user_message();
        assert!(msg.starts_with("[openai] API key invalid"));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(6), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(60), Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(MAX_BACKOFF_MS));
    }

    #[tokio::test]
    async fn test_retry_skips_non_recoverable() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_recoverable(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::from_status(401, "", "op")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_server_error() {
        let calls = AtomicU32::new(0);
        let result = retry_recoverable(2, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::from_status(500, "", "op"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
