//! Event sources - the remote side of the poll loop
//!
//! The core only needs two calls from the transport: fetch the next batch of
//! events after a cursor, and resolve who we are. Everything else about the
//! remote API stays behind this trait.

pub mod http;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Cursor, Event, Identity};
use crate::error::Result;

pub use http::{HttpEventSource, HttpSourceConfig};
pub use mock::MockEventSource;

/// Remote event stream consumed by [`crate::poller::PollLoop`].
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch events at or after `cursor`, in ascending `event_id` order.
    ///
    /// `wait_hint` is the remote long-poll timeout. An empty batch is a
    /// valid result. Network failures are `Transport` errors and malformed
    /// responses are `Protocol` errors.
    async fn fetch_events(&self, cursor: Cursor, wait_hint: Duration) -> Result<Vec<Event>>;

    /// Resolve this client's own identity. Called once at startup.
    async fn resolve_identity(&self) -> Result<Identity>;
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for std::sync::Arc<T> {
    async fn fetch_events(&self, cursor: Cursor, wait_hint: Duration) -> Result<Vec<Event>> {
        (**self).fetch_events(cursor, wait_hint).await
    }

    async fn resolve_identity(&self) -> Result<Identity> {
        (**self).resolve_identity().await
    }
}
