use thiserror::Error;

/// Errors reported by the remote API client.
///
/// The first five variants mirror the server's error vocabulary; the rest
/// describe transport failures.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Session id missing or expired on the server
    #[error("Not logged in")]
    NotLoggedIn,
    /// Credentials rejected, or the session was refused again right after a login
    #[error("Login failed: {0}")]
    LoginFailed(String),
    /// API access is disabled for this account
    #[error("API access is disabled on the server")]
    ApiDisabled,
    #[error("Server does not know this method")]
    UnknownMethod,
    #[error("Incorrect usage of the API")]
    IncorrectUsage,
    /// Any other error code sent by the server
    #[error("Server error: {0}")]
    Server(String),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Response could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

impl ApiError {
    /// Map a server error code from the response envelope.
    pub(crate) fn from_code(code: &str) -> Self {
        match code {
            "NOT_LOGGED_IN" => ApiError::NotLoggedIn,
            "LOGIN_ERROR" => ApiError::LoginFailed("credentials rejected".to_string()),
            "API_DISABLED" => ApiError::ApiDisabled,
            "UNKNOWN_METHOD" => ApiError::UnknownMethod,
            "INCORRECT_USAGE" => ApiError::IncorrectUsage,
            other => ApiError::Server(other.to_string()),
        }
    }

    /// Transient failures are retried at the next scheduled sync.
    ///
    /// Authentication and protocol errors are not: repeating the request
    /// cannot succeed until the configuration or the server changes.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout | ApiError::ResponseTooLarge => true,
            ApiError::HttpStatus(status) => *status >= 500 || *status == 429,
            ApiError::Parse(_) | ApiError::Server(_) => true,
            ApiError::NotLoggedIn
            | ApiError::LoginFailed(_)
            | ApiError::ApiDisabled
            | ApiError::UnknownMethod
            | ApiError::IncorrectUsage => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err)
        }
    }
}
