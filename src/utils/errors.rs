use thiserror::Error;

use crate::agent::AgentError;
use crate::browser::BrowserError;

/// Errors surfaced by a streaming session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Agent error: {0}")]
    Agent(String),
}

impl SessionError {
    /// True for errors raised while validating model, agent or browser settings.
    ///
    /// These are reported before any side effect (browser connection, agent
    /// launch) has taken place.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SessionError::MissingApiKey(_)
                | SessionError::UnsupportedProvider(_)
                | SessionError::InvalidConfig(_)
        )
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Implement From<BrowserError> for SessionError
impl From<BrowserError> for SessionError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::InvalidTarget(msg) => SessionError::InvalidConfig(msg),
            other => SessionError::Browser(other.to_string()),
        }
    }
}

/// Implement From<AgentError> for SessionError
impl From<AgentError> for SessionError {
    fn from(err: AgentError) -> Self {
        SessionError::Agent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_class_covers_validation_errors() {
        assert!(SessionError::MissingApiKey("openai".into()).is_configuration());
        assert!(SessionError::UnsupportedProvider("foo".into()).is_configuration());
        assert!(SessionError::InvalidConfig("steps".into()).is_configuration());
        assert!(!SessionError::Browser("closed".into()).is_configuration());
        assert!(!SessionError::Agent("boom".into()).is_configuration());
    }

    #[test]
    fn invalid_browser_target_is_a_configuration_error() {
        let err: SessionError = BrowserError::InvalidTarget("bad url".into()).into();
        assert!(err.is_configuration());

        let err: SessionError = BrowserError::ConnectFailed("refused".into()).into();
        assert!(matches!(err, SessionError::Browser(_)));
    }
}
