//! Scripted event source for tests and local experiments.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Cursor, Event, Identity};
use crate::error::{PollmuxError, Result};
use crate::source::EventSource;

#[derive(Debug, Default)]
struct MockState {
    fetches: VecDeque<Result<Vec<Event>>>,
    identity: Option<Result<Identity>>,
    requested: Vec<Cursor>,
    identity_calls: usize,
}

/// Event source that replays a queue of scripted fetch results.
///
/// Once the script is exhausted every fetch returns an empty batch. Every
/// cursor passed to `fetch_events` is recorded.
#[derive(Debug)]
pub struct MockEventSource {
    state: Mutex<MockState>,
    delay: Duration,
}

impl Default for MockEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEventSource {
    /// Create a source with identity `mock (1)` and an empty script
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                identity: Some(Ok(Identity::new(1, "mock"))),
                ..Default::default()
            }),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Script the result of `resolve_identity`
    pub fn with_identity(self, identity: Result<Identity>) -> Self {
        self.lock().identity = Some(identity);
        self
    }

    /// Queue a successful fetch
    pub fn push_batch(&self, events: Vec<Event>) {
        self.lock().fetches.push_back(Ok(events));
    }

    /// Queue a failed fetch
    pub fn push_error(&self, err: PollmuxError) {
        self.lock().fetches.push_back(Err(err));
    }

    /// Cursors passed to `fetch_events`, in call order
    pub fn requested_cursors(&self) -> Vec<Cursor> {
        self.lock().requested.clone()
    }

    /// Number of `fetch_events` calls so far
    pub fn fetch_count(&self) -> usize {
        self.lock().requested.len()
    }

    /// Number of `resolve_identity` calls so far
    pub fn identity_calls(&self) -> usize {
        self.lock().identity_calls
    }

    /// Scripted fetches not yet consumed
    pub fn pending(&self) -> usize {
        self.lock().fetches.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventSource for MockEventSource {
    async fn fetch_events(&self, cursor: Cursor, _wait_hint: Duration) -> Result<Vec<Event>> {
        let next = {
            let mut state = self.lock();
            state.requested.push(cursor);
            state.fetches.pop_front()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn resolve_identity(&self) -> Result<Identity> {
        let mut state = self.lock();
        state.identity_calls += 1;
        match &state.identity {
            Some(Ok(identity)) => Ok(identity.clone()),
            Some(Err(PollmuxError::Protocol(msg))) => Err(PollmuxError::Protocol(msg.clone())),
            Some(Err(PollmuxError::Transport(msg))) => Err(PollmuxError::Transport(msg.clone())),
            Some(Err(other)) => Err(PollmuxError::Transport(other.to_string())),
            None => Err(PollmuxError::Transport("no identity scripted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_script_then_empty() {
        let source = MockEventSource::new();
        source.push_batch(vec![Event::new(1, json!({}))]);
        source.push_error(PollmuxError::Transport("down".into()));

        let first = source.fetch_events(Cursor::start(), Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = source.fetch_events(Cursor::at(2), Duration::ZERO).await;
        assert!(matches!(second, Err(PollmuxError::Transport(_))));

        let third = source.fetch_events(Cursor::at(2), Duration::ZERO).await.unwrap();
        assert!(third.is_empty());

        assert_eq!(
            source.requested_cursors(),
            vec![Cursor::start(), Cursor::at(2), Cursor::at(2)]
        );
    }

    #[tokio::test]
    async fn test_identity_default_and_failure() {
        let source = MockEventSource::new();
        assert_eq!(source.resolve_identity().await.unwrap(), Identity::new(1, "mock"));

        let failing = MockEventSource::new()
            .with_identity(Err(PollmuxError::Transport("unreachable".into())));
        assert!(failing.resolve_identity().await.is_err());
        assert_eq!(failing.identity_calls(), 1);
    }
}
