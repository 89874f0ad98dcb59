//! Scripted change feed for testing.

use super::{ChangeFeed, ChangeStream};
use crate::error::ErrorKind;
use crate::models::{ChangeRecord, Cursor};
use async_stream::stream;
use std::sync::{Mutex, PoisonError};

/// One scripted step of a [`MockFeed`].
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Change(ChangeRecord),
    /// Yields a [`Network`](ErrorKind::Network) error, as a real feed does
    /// when its connection drops.
    Disconnect,
}

/// Scripted change feed for testing.
///
/// Replays its events to every subscriber, skipping changes at or before the
/// subscription cursor the same way a real feed resumes. Once the script is
/// exhausted the stream either ends or, with [`pending()`](Self::pending),
/// stays open forever like a quiet live feed.
pub struct MockFeed {
    events: Vec<FeedEvent>,
    pending: bool,
    subscriptions: Mutex<Vec<Cursor>>,
}
impl MockFeed {
    pub fn with_events(events: impl IntoIterator<Item = FeedEvent>) -> Self {
        Self { events: events.into_iter().collect(), pending: false, subscriptions: Mutex::new(Vec::new()) }
    }

    /// Convenience for a script made only of `(id, seq)` changes.
    pub fn with_changes<'a>(changes: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        Self::with_events(changes.into_iter().map(|(id, seq)| FeedEvent::Change(ChangeRecord::new(id, seq))))
    }

    /// Keep the stream open after the script runs out.
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// Every cursor this feed has been subscribed from, in order.
    pub fn subscriptions(&self) -> Vec<Cursor> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ChangeFeed for MockFeed {
    fn name(&self) -> &str {
        "mock"
    }

    fn subscribe(&self, from: Cursor) -> ChangeStream<'_> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).push(from);
        let events = self.events.clone();
        let pending = self.pending;
        Box::pin(stream! {
            for event in events {
                match event {
                    FeedEvent::Change(change) if from.seq().is_some_and(|seq| change.seq <= seq) => {},
                    FeedEvent::Change(change) => yield Ok(change),
                    FeedEvent::Disconnect => yield Err(exn::Exn::from(ErrorKind::Network)),
                }
            }
            if pending {
                futures::future::pending::<()>().await;
            }
        })
    }
}
