use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for gondola-net transport failures.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Timeout")]
    Timeout,
    #[error("Request failed after {max_retries} retries: {source}")]
    RetryExhausted { max_retries: u32, source: Box<Self> },
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus {
        status: u16,
        url: Url,
        body: Option<String>,
    },
}

impl NetError {
    /// Checks if this error is worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Http(msg) => {
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            Self::RetryExhausted { .. } => false,
        }
    }
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Alternate formatting includes the full error chain
        // (e.g. "error sending request … : connection refused").
        Self::Http(format!("{e:#}"))
    }
}

/// Errors in the update server's response body or headers, as opposed to
/// transport failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("multipart content-type without a boundary parameter")]
    MissingBoundary,
    #[error("malformed multipart body: {0}")]
    MalformedBody(String),
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    #[error("malformed directive: {0}")]
    MalformedDirective(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn test_url(raw: &str) -> Url {
        Url::parse(raw).expect("valid test URL")
    }

    #[rstest]
    #[case::timeout(NetError::Timeout, true)]
    #[case::http_500(NetError::HttpStatus { status: 500, url: test_url("http://example.com"), body: None }, true)]
    #[case::http_429(NetError::HttpStatus { status: 429, url: test_url("http://example.com"), body: None }, true)]
    #[case::http_404(NetError::HttpStatus { status: 404, url: test_url("http://example.com"), body: None }, false)]
    #[case::exhausted(NetError::RetryExhausted { max_retries: 3, source: Box::new(NetError::Timeout) }, false)]
    fn retryability(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[rstest]
    #[case("timeout while connecting", true)]
    #[case("connection reset", true)]
    #[case("404 no such manifest", false)]
    fn http_error_string_classification(#[case] msg: &str, #[case] expected: bool) {
        assert_eq!(NetError::Http(msg.to_string()).is_retryable(), expected);
    }
}
