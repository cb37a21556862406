//! Error types shared by the sync layer.
use thiserror::Error;

/// Errors from fetching a remote content page.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The remote has no such entity. Counted as a miss, never logged as an error.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    #[error("unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// True when the remote reported absence rather than a transport failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from syncing a single entity.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("{kind} {id} exists but has no name")]
    EmptyName { kind: &'static str, id: i64 },

    #[error("invalid {kind} id: {id}")]
    InvalidId { kind: &'static str, id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = FetchError::NotFound { kind: "item", id: 5 };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "item not found: 5");

        let err = FetchError::Status {
            status: 503,
            url: "http://x".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_sync_error_wraps_fetch() {
        let err: SyncError = FetchError::NotFound { kind: "quest", id: 9 }.into();
        assert_eq!(err.to_string(), "quest not found: 9");
    }
}
