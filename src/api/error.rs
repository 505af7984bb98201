//! Error type for the REST client.

use reqwest::StatusCode;

/// Errors raised by [`ApiClient`](super::ApiClient) calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401: the bearer token was rejected.
    #[error("not authorized ({0})")]
    Unauthorized(StatusCode),
    /// 403: the token is fine but lacks access to this resource.
    #[error("forbidden ({0})")]
    Forbidden(StatusCode),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    /// The server answered `success: false`.
    #[error("{0}")]
    Rejected(String),
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Whether this error is the global signal to drop the stored token.
    /// A 403 is not: it only denies one resource.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Forbidden(_))
    }

    /// Message suitable for showing next to a login form.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized(_) => "Invalid email or password".to_string(),
            ApiError::Forbidden(_) => "You do not have access to this resource".to_string(),
            ApiError::Timeout => "The server took too long to respond".to_string(),
            ApiError::Network(_) => "Unable to reach the server".to_string(),
            ApiError::Status { message, .. } | ApiError::Rejected(message) => message.clone(),
            ApiError::Decode(_) => "Unexpected response from the server".to_string(),
            ApiError::Url(_) => "Invalid server address".to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e)
        }
    }
}

/// Map 401 to `Unauthorized` and 403 to `Forbidden`.
pub(crate) fn auth_status(status: StatusCode) -> Option<ApiError> {
    match status {
        StatusCode::UNAUTHORIZED => Some(ApiError::Unauthorized(status)),
        StatusCode::FORBIDDEN => Some(ApiError::Forbidden(status)),
        _ => None,
    }
}
