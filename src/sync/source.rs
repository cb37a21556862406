//! Remote content source.
use crate::error::FetchError;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Kind of remote content page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Item,
    Quest,
    Spell,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Quest => "quest",
            Self::Spell => "spell",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page URL for an entity, e.g. `https://host/?item=19019`.
pub fn entity_url(base_url: &str, kind: EntityKind, id: i64) -> String {
    format!("{}/?{}={id}", base_url.trim_end_matches('/'), kind.as_str())
}

/// Fetches raw content pages by kind and id.
///
/// Implementations must be `Send + Sync`: the full sync worker pool shares
/// one source across threads.
pub trait RemoteSource: Send + Sync {
    fn fetch(&self, kind: EntityKind, id: i64) -> Result<String, FetchError>;

    /// Where the page for `(kind, id)` lives, for reporting.
    fn url(&self, kind: EntityKind, id: i64) -> String;
}

/// Blocking HTTP source. Call only from blocking contexts.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl RemoteSource for HttpSource {
    fn fetch(&self, kind: EntityKind, id: i64) -> Result<String, FetchError> {
        let url = self.url(kind, id);
        debug!("GET {url}");

        let resp = self.client.get(&url).send()?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                kind: kind.as_str(),
                id,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(resp.text()?)
    }

    fn url(&self, kind: EntityKind, id: i64) -> String {
        entity_url(&self.base_url, kind, id)
    }
}
