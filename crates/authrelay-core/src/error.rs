use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// The type is `Clone` so a single renewal outcome can be handed to the
/// triggering request and every queued waiter alike.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Login or registration input was rejected by the server.
    #[error("{0}")]
    CredentialRejected(String),

    /// The request still failed authentication after a renewal.
    #[error("Authentication failed - session is no longer valid")]
    AuthenticationFailed,

    /// The renewal call itself was rejected or errored.
    #[error("Session renewal failed: {0}")]
    RenewalFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// A response did not match the expected shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Network(err.to_string())
    }
}

impl SessionError {
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

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        SessionError::UnexpectedStatus {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// True for errors that mean the caller no longer holds a usable session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::AuthenticationFailed | SessionError::RenewalFailed(_)
        ) || matches!(self, SessionError::UnexpectedStatus { status: 401, .. })
    }

    /// Message suitable for showing inline on the form that issued the call.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::CredentialRejected(msg) => msg.clone(),
            SessionError::AuthenticationFailed | SessionError::RenewalFailed(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            SessionError::Network(_) => "Could not reach the server. Try again.".to_string(),
            _ => "Unexpected error. Try again.".to_string(),
        }
    }
}
