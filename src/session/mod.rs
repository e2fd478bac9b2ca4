//! Sessions - per-identifier state created lazily and retired when idle
//!
//! A host supplies a [`SessionFactory`] that maps events to identifiers and
//! builds one [`Session`] per identifier. Every hook on `Session` is optional
//! and defaults to a no-op.

pub mod identify;
pub mod table;

use async_trait::async_trait;

use crate::domain::{Event, Identity};
use crate::error::Result;

pub use identify::{PointerIdentifier, UNKNOWN_IDENTIFIER};
pub use table::{SessionStats, SessionTable};

/// Host-defined per-identifier session.
///
/// Errors returned from any hook are not caught: they fail the current
/// batch, which is then retried from the same cursor after the cooldown. A
/// session that fails permanently therefore stalls the stream until it is
/// fixed. Sessions that want per-event isolation should handle their own
/// errors and return `Ok(())`.
#[async_trait]
pub trait Session: Send {
    /// Called once before the first event is processed
    async fn on_create(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called for every event routed to this session, in arrival order
    async fn process_event(&mut self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Called once when the session is evicted, removed, or shut down
    async fn on_remove(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds sessions and decides which session an event belongs to.
pub trait SessionFactory: Send {
    type Session: Session;

    /// Deterministic identifier for an event.
    ///
    /// Must not fail; malformed events map to a stable sentinel such as
    /// [`UNKNOWN_IDENTIFIER`].
    fn identify(&self, event: &Event) -> String;

    /// Construct the session for a new identifier
    fn create(&mut self, identifier: &str, identity: &Identity) -> Self::Session;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Bare;

    impl Session for Bare {}

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let mut session = Bare;
        session.on_create().await.unwrap();
        session.process_event(&Event::new(1, json!({}))).await.unwrap();
        session.on_remove().await.unwrap();
    }
}
