use std::path::PathBuf;

/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the relay can
/// decide consistently between a fatal startup failure, a retry, and a
/// user-facing reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// Signal gateway unreachable or returned an error status.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Provider failure: network, timeout, rate limit, malformed response.
    #[error("provider error: {0}")]
    Provider(String),

    /// Provider refused the request on policy grounds. The message is shown verbatim.
    #[error("{0}")]
    ContentPolicy(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Text sent back to the chat when a turn fails.
    pub fn user_message(&self) -> String {
        match self {
            Error::ContentPolicy(msg) => msg.clone(),
            Error::Provider(detail) => {
                format!("Sorry, I couldn't generate a response at this time. ({detail})")
            }
            _ => "Sorry, something went wrong while handling your message.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_policy_is_verbatim() {
        let e = Error::ContentPolicy("Request blocked: SAFETY".to_string());
        assert_eq!(e.user_message(), "Request blocked: SAFETY");
    }

    #[test]
    fn provider_error_includes_detail() {
        let e = Error::Provider("timed out after 120s".to_string());
        let msg = e.user_message();
        assert!(msg.starts_with("Sorry"));
        assert!(msg.contains("timed out"));
    }
}
