use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unauthorized - token may be expired")]
    AuthorizationExpired,

    /// 401 on a request sent without any credential
    #[error("Not signed in: {0}")]
    NotAuthenticated(String),

    #[error("Session refresh denied: {0}")]
    RefreshDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull the human-readable message out of an error body.
    ///
    /// The backend answers failures with `{"error": "..."}`, some routes with
    /// `{"message": "..."}`. Anything else falls back to the (truncated) raw body.
    pub fn message_from_body(body: &str) -> String {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            for field in ["error", "message"] {
                if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                    return text.to_string();
                }
            }
        }
        Self::truncate_body(body.trim())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => ApiError::AuthorizationExpired,
            _ => ApiError::Server {
                status,
                message: Self::message_from_body(body),
            },
        }
    }

    /// Message suitable for a user-visible notice, if there is one worth showing.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ApiError::InvalidCredentials(msg)
            | ApiError::RefreshDenied(msg)
            | ApiError::NotAuthenticated(msg)
            | ApiError::Network(msg)
            | ApiError::InvalidInput(msg) => Some(msg.clone()),
            ApiError::Server { message, .. } if !message.is_empty() => Some(message.clone()),
            ApiError::Server { status, .. } => Some(format!("Request failed with status {}", status)),
            ApiError::AuthorizationExpired => Some(self.to_string()),
            ApiError::InvalidResponse(_) | ApiError::Storage(_) => Some(self.to_string()),
        }
    }

    /// True for failures that end the session when they escape the gateway.
    pub fn ends_session(&self) -> bool {
        matches!(self, ApiError::AuthorizationExpired | ApiError::RefreshDenied(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(format!("{:#}", err))
    }
}
