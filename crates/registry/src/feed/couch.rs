//! CouchDB `_changes` follower.
//!
//! The npm registry publishes its change feed as a CouchDB database. This
//! follower long-polls `_changes`, hands out one [`ChangeRecord`] per row,
//! and reconnects with exponential back-off when the connection misbehaves.

use super::{ChangeFeed, ChangeStream};
use crate::error::{ErrorKind, Result};
use crate::models::{ChangeRecord, Cursor};
use async_stream::stream;
use exn::ResultExt;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// A long-poll with no changes for an hour is recycled.
const DEFAULT_INACTIVITY: Duration = Duration::from_secs(60 * 60);
const DEFAULT_BATCH_LIMIT: usize = 500;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Extra time on top of the server-side long-poll timeout before the client
/// gives up on a request.
const CLIENT_GRACE: Duration = Duration::from_secs(30);

/// A CouchDB sequence value.
///
/// CouchDB 1.x uses plain integers. Later versions use opaque strings whose
/// leading digits are the position (`"123-g1AAAA..."`). The raw value is kept
/// so it can be handed back verbatim as `since` on the next request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CouchSeq {
    Number(u64),
    Text(String),
}
impl CouchSeq {
    fn position(&self) -> Result<u64> {
        match self {
            Self::Number(seq) => Ok(*seq),
            Self::Text(text) => {
                let digits = text.split('-').next().unwrap_or_default();
                digits.parse::<u64>().or_raise(|| ErrorKind::InvalidSeq(text.clone()))
            },
        }
    }

    fn as_query(&self) -> String {
        match self {
            Self::Number(seq) => seq.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    seq: CouchSeq,
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChangesPage {
    #[serde(default)]
    results: Vec<ChangeRow>,
    last_seq: Option<CouchSeq>,
}

/// Follows a CouchDB database's `_changes` feed.
///
/// # Examples
///
/// ```no_run
/// use regsync_registry::feed::CouchFeed;
/// use std::time::Duration;
///
/// # fn example() -> regsync_registry::error::Result<()> {
/// let feed = CouchFeed::new("https://skimdb.npmjs.com/registry")?
///     .with_inactivity(Duration::from_secs(300));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CouchFeed {
    name: String,
    changes: Url,
    client: Client,
    inactivity: Duration,
    batch_limit: usize,
    backoff: (Duration, Duration),
}
impl CouchFeed {
    pub fn new(db: &str) -> Result<Self> {
        // A trailing slash makes `_changes` resolve inside the database
        // instead of replacing its last path segment.
        let base = match db.ends_with('/') {
            true => db.to_string(),
            false => format!("{db}/"),
        };
        let changes = Url::parse(&base)
            .and_then(|base| base.join("_changes"))
            .or_raise(|| ErrorKind::InvalidUrl(db.to_string()))?;
        Ok(Self {
            name: changes.host_str().unwrap_or("couchdb").to_string(),
            changes,
            client: Client::new(),
            inactivity: DEFAULT_INACTIVITY,
            batch_limit: DEFAULT_BATCH_LIMIT,
            backoff: (INITIAL_BACKOFF, MAX_BACKOFF),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// How long the server may hold a long-poll open without any change.
    pub fn with_inactivity(mut self, inactivity: Duration) -> Self {
        self.inactivity = inactivity;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Reconnect delay: starts at `initial`, doubles per consecutive failure,
    /// capped at `max`.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = (initial, max.max(initial));
        self
    }

    fn page_url(&self, since: &str) -> Url {
        let mut url = self.changes.clone();
        url.query_pairs_mut()
            .append_pair("feed", "longpoll")
            .append_pair("since", since)
            .append_pair("timeout", &self.inactivity.as_millis().to_string())
            .append_pair("limit", &self.batch_limit.to_string());
        url
    }

    #[instrument(skip(self), fields(feed = %self.name))]
    async fn poll(&self, since: &str) -> Result<ChangesPage> {
        let response =
            classify(self.client.get(self.page_url(since)).timeout(self.inactivity + CLIENT_GRACE).send().await)?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(status.as_u16()));
        }
        let body = classify(response.bytes().await)?;
        serde_json::from_slice(&body).or_raise(|| ErrorKind::Decode)
    }
}

/// Separate timeouts from other transport failures; only the latter are
/// worth telling the consumer about.
pub(crate) fn classify<T>(result: reqwest::Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_timeout() => Err(e).or_raise(|| ErrorKind::Timeout),
        Err(e) => Err(e).or_raise(|| ErrorKind::Network),
    }
}

/// Turn one page into change records plus the `since` for the next request.
fn unpack(page: ChangesPage) -> (Vec<Result<ChangeRecord>>, Option<String>) {
    let next = page.last_seq.as_ref().map(CouchSeq::as_query);
    let records = page
        .results
        .into_iter()
        // Design documents are CouchDB views, not packages.
        .filter(|row| !row.id.starts_with("_design/"))
        .map(|row| row.seq.position().map(|seq| ChangeRecord { id: row.id, seq }))
        .collect();
    (records, next)
}

impl ChangeFeed for CouchFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, from: Cursor) -> ChangeStream<'_> {
        let (initial, max) = self.backoff;
        Box::pin(stream! {
            let mut since = from.to_string();
            let mut delay = initial;
            loop {
                match self.poll(&since).await {
                    Ok(page) => {
                        delay = initial;
                        let (records, next) = unpack(page);
                        for record in records {
                            yield record;
                        }
                        if let Some(next) = next {
                            since = next;
                        }
                    },
                    // An idle long-poll that the client gave up on is not a
                    // connection problem; just ask again.
                    Err(e) if matches!(&*e, ErrorKind::Timeout) => {
                        tracing::debug!(feed = %self.name, since = %since, "Change feed idle; reconnecting");
                    },
                    Err(e) => {
                        yield Err(e);
                        tracing::debug!(feed = %self.name, delay_ms = delay.as_millis() as u64, "Backing off before reconnecting");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(max);
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://skimdb.npmjs.com/registry", "https://skimdb.npmjs.com/registry/_changes")]
    #[case("https://skimdb.npmjs.com/registry/", "https://skimdb.npmjs.com/registry/_changes")]
    #[case("http://localhost:5984/db", "http://localhost:5984/db/_changes")]
    fn test_changes_url(#[case] db: &str, #[case] expected: &str) {
        assert_eq!(CouchFeed::new(db).unwrap().changes.as_str(), expected);
    }

    #[test]
    fn test_invalid_url() {
        let err = CouchFeed::new("not a url").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[test]
    fn test_page_url() {
        let feed = CouchFeed::new("http://localhost:5984/db")
            .unwrap()
            .with_inactivity(Duration::from_secs(2))
            .with_batch_limit(10);
        assert_eq!(
            feed.page_url("now").as_str(),
            "http://localhost:5984/db/_changes?feed=longpoll&since=now&timeout=2000&limit=10"
        );
    }

    #[rstest]
    #[case("594192", 594192)]
    #[case("\"1234\"", 1234)]
    #[case("\"99-g1AAAAFTeJzLYWBgYM\"", 99)]
    #[case("\"18446744073709551615-g1AA\"", u64::MAX)]
    fn test_seq_position(#[case] raw: &str, #[case] expected: u64) {
        let seq: CouchSeq = serde_json::from_str(raw).unwrap();
        assert_eq!(seq.position().unwrap(), expected);
    }

    #[test]
    fn test_seq_position_invalid() {
        let seq: CouchSeq = serde_json::from_str("\"g1AAAA\"").unwrap();
        assert!(matches!(&*seq.position().unwrap_err(), ErrorKind::InvalidSeq(_)));
    }

    #[test]
    fn test_unpack_page() {
        let page: ChangesPage = serde_json::from_str(
            r#"{
                "results": [
                    {"seq": 10, "id": "foo", "changes": [{"rev": "1-a"}]},
                    {"seq": 11, "id": "_design/app", "changes": [{"rev": "2-b"}]},
                    {"seq": 12, "id": "@scope/bar", "changes": [{"rev": "3-c"}]}
                ],
                "last_seq": 12
            }"#,
        )
        .unwrap();
        let (records, next) = unpack(page);
        let records: Vec<_> = records.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records, [ChangeRecord::new("foo", 10), ChangeRecord::new("@scope/bar", 12)]);
        assert_eq!(next.as_deref(), Some("12"));
    }

    #[test]
    fn test_unpack_keeps_opaque_since() {
        let page: ChangesPage =
            serde_json::from_str(r#"{"results": [], "last_seq": "7-g1AAAA"}"#).unwrap();
        let (records, next) = unpack(page);
        assert!(records.is_empty());
        assert_eq!(next.as_deref(), Some("7-g1AAAA"));
    }
}
