//! Change feed trait and implementations.

pub(crate) mod couch;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::couch::CouchFeed;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{FeedEvent, MockFeed};
use crate::error::Result;
use crate::models::{ChangeRecord, Cursor};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub type ChangeStream<'a> = Pin<Box<dyn Stream<Item = Result<ChangeRecord>> + Send + 'a>>;
pub type FeedHandle = Arc<dyn ChangeFeed + Send + Sync>;

/// An append-only, sequence-numbered stream of package changes.
///
/// The stream returned by [`subscribe()`](Self::subscribe) is lazy and, under
/// normal operation, never ends. Connection problems surface as `Err` items;
/// the implementation reconnects by itself and keeps going, so consumers
/// should log those errors and carry on polling.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use regsync_registry::{ChangeFeed, Cursor};
///
/// async fn print_changes(feed: &dyn ChangeFeed) {
///     let mut changes = feed.subscribe(Cursor::Live);
///     while let Some(change) = changes.next().await {
///         match change {
///             Ok(change) => println!("{} changed at {}", change.id, change.seq),
///             Err(e) => eprintln!("feed hiccup: {e:?}"),
///         }
///     }
/// }
/// ```
pub trait ChangeFeed: Send + Sync {
    /// Name of the feed, used for logging only.
    fn name(&self) -> &str;

    /// Follow the feed, starting after `from`.
    fn subscribe(&self, from: Cursor) -> ChangeStream<'_>;
}
