//! Shared HTTP plumbing for the source clients.

use pulse_core::HttpConfig;
use pulse_core::error::AppError;
use reqwest::{Client, Response};

/// Longest slice of an error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

pub(crate) fn build_client(config: &HttpConfig) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout)
        .build()
        .map_err(|e| AppError::ClientError(e.to_string()))
}

/// Maps a transport failure. Timeouts and anything that went wrong on the
/// wire (refused, reset, closed mid-body) are transient; a request that
/// could not be built is a client error.
pub(crate) fn send_error(e: reqwest::Error, config: &HttpConfig) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(config.timeout.as_secs())
    } else if e.is_connect() || e.is_request() || e.is_body() || has_io_source(&e) {
        AppError::NetworkError(error_chain(&e))
    } else {
        AppError::ClientError(e.to_string())
    }
}

fn has_io_source(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if err.is::<std::io::Error>() {
            return true;
        }
        source = err.source();
    }
    false
}

/// Error text including its causes, so "error sending request" keeps the
/// underlying reason.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

/// Passes a 2xx response through, classifies anything else.
pub(crate) async fn check_status(resp: Response) -> Result<Response, AppError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(AppError::from_status(status.as_u16(), truncate(&body)))
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
