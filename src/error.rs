use thiserror::Error;

/// Failures of the sync engine. `Display` is the message shown to the user.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No session is active; the request was never sent.
    #[error("Please log in first")]
    Unauthenticated,

    /// Input rejected locally before any network call.
    #[error("{0}")]
    InvalidInput(String),

    /// The backend refused the request; carries its `detail` verbatim.
    #[error("{0}")]
    Backend(String),

    /// The session ended or changed while the request was in flight.
    #[error("Session changed before the response arrived")]
    SessionChanged,

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Transport and decode failures leave displayed data untouched and are
    /// retried by the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Decode(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_detail_is_shown_verbatim() {
        let err = SyncError::backend("TSLA already in watchlist");
        assert_eq!(err.to_string(), "TSLA already in watchlist");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_decode_is_transient() {
        let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.is_transient());
        assert!(err.to_string().starts_with("Malformed response"));
    }
}
