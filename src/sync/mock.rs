/// In-memory remote source for tests and offline runs.
///
/// Serves pages from a map keyed by `(kind, id)`; anything not in the map
/// is reported as not found. Every fetch is counted.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::source::{EntityKind, RemoteSource, entity_url};
use crate::error::FetchError;

#[derive(Default)]
pub struct MockSource {
    pages: HashMap<(EntityKind, i64), String>,
    broken: HashSet<(EntityKind, i64)>,
    calls: AtomicUsize,
}

impl MockSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `(kind, id)`.
    #[must_use]
    pub fn with_page(mut self, kind: EntityKind, id: i64, html: impl Into<String>) -> Self {
        self.pages.insert((kind, id), html.into());
        self
    }

    /// Make `(kind, id)` fail with a transport error.
    #[must_use]
    pub fn with_failure(mut self, kind: EntityKind, id: i64) -> Self {
        self.broken.insert((kind, id));
        self
    }

    /// Number of fetches served so far, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteSource for MockSource {
    fn fetch(&self, kind: EntityKind, id: i64) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&(kind, id)) {
            return Err(FetchError::Unavailable(format!("{kind} {id}: connection reset")));
        }
        self.pages
            .get(&(kind, id))
            .cloned()
            .ok_or(FetchError::NotFound {
                kind: kind.as_str(),
                id,
            })
    }

    fn url(&self, kind: EntityKind, id: i64) -> String {
        entity_url("mock://content", kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_serves_pages() {
        let source = MockSource::new().with_page(EntityKind::Item, 1, "<title>x</title>");
        assert_eq!(source.fetch(EntityKind::Item, 1).unwrap(), "<title>x</title>");
        assert!(source.fetch(EntityKind::Item, 2).unwrap_err().is_not_found());
        // Same id, different kind
        assert!(source.fetch(EntityKind::Quest, 1).unwrap_err().is_not_found());
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_mock_failure_is_not_a_miss() {
        let source = MockSource::new().with_failure(EntityKind::Spell, 5);
        let err = source.fetch(EntityKind::Spell, 5).unwrap_err();
        assert!(!err.is_not_found());
    }
}
