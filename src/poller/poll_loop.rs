//! PollLoop - owns the cursor and drives fetch -> dispatch -> reschedule.
//!
//! Only one cycle is ever in flight. The handler is awaited before the
//! cursor moves, so batches are never processed concurrently or out of
//! order. A failed fetch or a failed dispatch leaves the cursor where it was
//! and the same range is fetched again after the cooldown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{Cursor, Event};
use crate::error::{PollmuxError, Result};
use crate::poller::stats::PollStats;
use crate::source::EventSource;

/// Receives each non-empty batch, in order.
#[async_trait]
pub trait BatchHandler: Send {
    /// Process a batch. An error fails the whole cycle and the batch is retried.
    async fn on_batch(&mut self, events: &[Event]) -> Result<()>;
}

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between cycles after a successful or empty fetch
    pub interval: Duration,
    /// Delay after a failed cycle
    pub cooldown: Duration,
    /// Long-poll timeout passed to the remote API
    pub wait_hint: Duration,
    /// Upper bound on a single fetch, regardless of the transport
    pub fetch_timeout: Duration,
    /// Discard events that were pending before startup
    pub skip_backlog: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            cooldown: Duration::from_millis(6000),
            wait_hint: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
            skip_backlog: true,
        }
    }
}

impl PollConfig {
    /// Create a config with the given interval and a cooldown of 4x the interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cooldown: interval * 4,
            ..Default::default()
        }
    }

    /// Set the cooldown interval
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the remote long-poll wait hint
    pub fn with_wait_hint(mut self, wait_hint: Duration) -> Self {
        self.wait_hint = wait_hint;
        self
    }

    /// Set the per-fetch upper bound
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Enable or disable the backlog skip
    pub fn with_skip_backlog(mut self, skip_backlog: bool) -> Self {
        self.skip_backlog = skip_backlog;
        self
    }
}

/// Lifecycle state of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Created, never started
    Idle,
    /// Cycles are running or scheduled
    Polling,
    /// Stopped; needs a fresh `start()` to poll again
    Stopped,
}

/// What one cycle did
#[derive(Debug)]
pub enum CycleOutcome {
    /// A non-empty batch was dispatched and the cursor advanced
    Delivered { events: usize, cursor: Cursor },
    /// The fetch returned no events
    Empty,
    /// Fetch or dispatch failed; the cursor did not move
    Failed(PollmuxError),
}

impl CycleOutcome {
    /// Whether the cycle failed
    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Failed(_))
    }
}

/// Clonable handle for observing and stopping a poll loop from other tasks.
#[derive(Debug, Clone)]
pub struct PollHandle {
    state: Arc<watch::Sender<PollState>>,
}

impl PollHandle {
    /// Current state
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Whether the loop is polling
    pub fn is_polling(&self) -> bool {
        self.state() == PollState::Polling
    }

    /// Stop the loop. No-op unless it is polling.
    ///
    /// A cycle in progress is allowed to finish; the loop exits right after
    /// it instead of rescheduling. A pending sleep is cut short.
    pub fn stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == PollState::Polling {
                *state = PollState::Stopped;
                true
            } else {
                false
            }
        })
    }
}

/// Cursor-owning long-poll loop over an [`EventSource`].
pub struct PollLoop<S: EventSource> {
    source: S,
    config: PollConfig,
    cursor: Cursor,
    state: Arc<watch::Sender<PollState>>,
    stats: PollStats,
}

impl<S: EventSource> PollLoop<S> {
    /// Create an idle loop with the cursor at the start of the stream
    pub fn new(source: S, config: PollConfig) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            source,
            config,
            cursor: Cursor::start(),
            state: Arc::new(state),
            stats: PollStats::new(),
        }
    }

    /// Current cursor
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Current state
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Whether the loop is polling
    pub fn is_polling(&self) -> bool {
        self.state() == PollState::Polling
    }

    /// Statistics so far
    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Configuration in use
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// The event source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Handle for stopping the loop from elsewhere
    pub fn handle(&self) -> PollHandle {
        PollHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Explicitly re-initialise the cursor. The only way it moves backward.
    pub fn reset_cursor(&mut self, cursor: Cursor) {
        log::info!("Cursor reset from {} to {}", self.cursor, cursor);
        self.cursor = cursor;
    }

    /// Enter the polling state, optionally skipping the pending backlog first.
    ///
    /// A no-op returning `true` if already polling. Failures in the skip step
    /// are logged and ignored.
    pub async fn start(&mut self, skip_backlog: bool) -> bool {
        if self.is_polling() {
            return true;
        }

        if skip_backlog {
            self.skip_backlog().await;
        }

        self.state.send_replace(PollState::Polling);
        log::info!("Polling started at cursor {}", self.cursor);
        true
    }

    /// Stop the loop. Idempotent.
    pub fn stop(&self) -> bool {
        self.handle().stop()
    }

    /// Fetch the newest pending event and move the cursor past it without
    /// dispatching it.
    async fn skip_backlog(&mut self) {
        match self.fetch_bounded(Cursor::LATEST).await {
            Ok(events) => match events.last() {
                Some(latest) => {
                    self.cursor = self.cursor.advanced_past(latest.event_id);
                    self.stats.skipped_event = Some(latest.event_id);
                    tracing::info!(
                        skipped_event = latest.event_id,
                        cursor = self.cursor.value(),
                        "Skipped pending backlog"
                    );
                }
                None => log::debug!("No backlog to skip"),
            },
            Err(e) => log::warn!("Backlog skip failed, polling from cursor {}: {}", self.cursor, e),
        }
    }

    async fn fetch_bounded(&self, cursor: Cursor) -> Result<Vec<Event>> {
        let fetch = self.source.fetch_events(cursor, self.config.wait_hint);
        match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(PollmuxError::Transport(format!(
                "fetch timed out after {}ms",
                self.config.fetch_timeout.as_millis()
            ))),
        }
    }

    /// Run exactly one fetch -> dispatch cycle.
    pub async fn poll_once<H: BatchHandler + ?Sized>(&mut self, handler: &mut H) -> CycleOutcome {
        let events = match self.fetch_bounded(self.cursor).await {
            Ok(events) => events,
            Err(e) => {
                self.stats.failed();
                log::warn!("Fetch at cursor {} failed: {}", self.cursor, e);
                return CycleOutcome::Failed(e);
            }
        };

        if events.is_empty() {
            self.stats.empty();
            return CycleOutcome::Empty;
        }

        if let Err(e) = handler.on_batch(&events).await {
            self.stats.failed();
            log::warn!(
                "Dispatch of {} events at cursor {} failed, batch will be retried: {}",
                events.len(),
                self.cursor,
                e
            );
            return CycleOutcome::Failed(e);
        }

        self.cursor = self.cursor.advanced_past_batch(&events);
        self.stats.delivered(events.len());
        tracing::debug!(events = events.len(), cursor = self.cursor.value(), "Batch delivered");
        CycleOutcome::Delivered {
            events: events.len(),
            cursor: self.cursor,
        }
    }

    /// Delay before the next cycle
    pub fn next_delay(&self, outcome: &CycleOutcome) -> Duration {
        if outcome.is_failure() {
            self.config.cooldown
        } else {
            self.config.interval
        }
    }

    /// Run cycles until the loop is stopped.
    ///
    /// Returns immediately if the loop is not polling.
    pub async fn run<H: BatchHandler + ?Sized>(&mut self, handler: &mut H) {
        let mut state_rx = self.state.subscribe();

        while self.is_polling() {
            let outcome = self.poll_once(handler).await;
            if !self.is_polling() {
                break;
            }

            let delay = self.next_delay(&outcome);
            if let CycleOutcome::Failed(e) = &outcome {
                if e.is_recoverable() {
                    tracing::warn!(
                        delay_ms = delay.as_millis() as u64,
                        consecutive_failures = self.stats.consecutive_failures,
                        "Cooling down after failed cycle"
                    );
                } else {
                    tracing::error!(
                        delay_ms = delay.as_millis() as u64,
                        consecutive_failures = self.stats.consecutive_failures,
                        error = %e,
                        "Unexpected failure from batch handler, cooling down"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = state_rx.wait_for(|state| *state != PollState::Polling) => {}
            }
        }

        log::info!("Polling stopped at cursor {}", self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockEventSource;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        batches: Vec<Vec<i64>>,
        fail_next: usize,
    }

    #[async_trait]
    impl BatchHandler for Recorder {
        async fn on_batch(&mut self, events: &[Event]) -> Result<()> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(PollmuxError::session("1", PollmuxError::Hook("boom".into())));
            }
            self.batches.push(events.iter().map(|e| e.event_id).collect());
            Ok(())
        }
    }

    /// Stops the loop after a number of batches
    struct StopAfter {
        handle: Option<PollHandle>,
        remaining: usize,
    }

    #[async_trait]
    impl BatchHandler for StopAfter {
        async fn on_batch(&mut self, _events: &[Event]) -> Result<()> {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                if let Some(handle) = &self.handle {
                    handle.stop();
                }
            }
            Ok(())
        }
    }

    fn events(ids: &[i64]) -> Vec<Event> {
        ids.iter().map(|id| Event::new(*id, json!({"n": id}))).collect()
    }

    fn fast_config() -> PollConfig {
        PollConfig::new(Duration::from_millis(10)).with_skip_backlog(false)
    }

    #[test]
    fn test_config_default() {
        let config = PollConfig::default();
        assert_eq!(config.interval, Duration::from_millis(1500));
        assert_eq!(config.cooldown, Duration::from_millis(6000));
        assert!(config.skip_backlog);
    }

    #[test]
    fn test_config_new_sets_cooldown_to_four_intervals() {
        let config = PollConfig::new(Duration::from_secs(1));
        assert_eq!(config.cooldown, Duration::from_secs(4));
    }

    #[test]
    fn test_new_loop_is_idle_at_zero() {
        let poll = PollLoop::new(MockEventSource::new(), PollConfig::default());
        assert_eq!(poll.state(), PollState::Idle);
        assert_eq!(poll.cursor(), Cursor::start());
    }

    #[tokio::test]
    async fn test_delivered_batch_advances_cursor_past_max() {
        let source = Arc::new(MockEventSource::new());
        source.push_batch(events(&[5]));
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());
        let mut handler = Recorder::default();

        let outcome = poll.poll_once(&mut handler).await;
        assert!(matches!(outcome, CycleOutcome::Delivered { events: 1, .. }));
        assert_eq!(poll.cursor(), Cursor::at(6));

        poll.poll_once(&mut handler).await;
        assert_eq!(source.requested_cursors(), vec![Cursor::at(0), Cursor::at(6)]);
        assert_eq!(handler.batches, vec![vec![5]]);
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_cursor() {
        let source = MockEventSource::new();
        source.push_batch(Vec::new());
        let mut poll = PollLoop::new(source, fast_config());
        poll.reset_cursor(Cursor::at(9));

        let outcome = poll.poll_once(&mut Recorder::default()).await;
        assert!(matches!(outcome, CycleOutcome::Empty));
        assert_eq!(poll.cursor(), Cursor::at(9));
        assert_eq!(poll.stats().empty_polls, 1);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_cursor_and_uses_cooldown() {
        let source = MockEventSource::new();
        source.push_error(PollmuxError::Transport("connection reset".into()));
        let mut poll = PollLoop::new(source, fast_config());

        let outcome = poll.poll_once(&mut Recorder::default()).await;
        assert!(outcome.is_failure());
        assert_eq!(poll.cursor(), Cursor::start());
        assert_eq!(poll.next_delay(&outcome), Duration::from_millis(40));
        assert_eq!(poll.next_delay(&CycleOutcome::Empty), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_dispatch_failure_retries_same_batch() {
        let source = Arc::new(MockEventSource::new());
        source.push_batch(events(&[3, 4]));
        source.push_batch(events(&[3, 4]));
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());
        let mut handler = Recorder {
            fail_next: 1,
            ..Default::default()
        };

        assert!(poll.poll_once(&mut handler).await.is_failure());
        assert_eq!(poll.cursor(), Cursor::start());

        poll.poll_once(&mut handler).await;
        assert_eq!(poll.cursor(), Cursor::at(5));
        assert_eq!(source.requested_cursors(), vec![Cursor::at(0), Cursor::at(0)]);
        assert_eq!(handler.batches, vec![vec![3, 4]]);
        assert_eq!(poll.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_transport_failure() {
        let source = MockEventSource::new().with_delay(Duration::from_millis(200));
        let config = fast_config().with_fetch_timeout(Duration::from_millis(20));
        let mut poll = PollLoop::new(source, config);

        match poll.poll_once(&mut Recorder::default()).await {
            CycleOutcome::Failed(PollmuxError::Transport(msg)) => assert!(msg.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_long_poll_within_fetch_timeout_is_empty() {
        let wait_hint = Duration::from_secs(25);
        let source = MockEventSource::new().with_delay(wait_hint);
        let config = fast_config()
            .with_wait_hint(wait_hint)
            .with_fetch_timeout(Duration::from_secs(30));
        let mut poll = PollLoop::new(source, config);

        let outcome = poll.poll_once(&mut Recorder::default()).await;
        assert!(matches!(outcome, CycleOutcome::Empty));
        assert_eq!(poll.stats().failures, 0);
    }

    #[tokio::test]
    async fn test_unrecoverable_handler_error_still_cools_down() {
        struct Misconfigured;

        #[async_trait]
        impl BatchHandler for Misconfigured {
            async fn on_batch(&mut self, _events: &[Event]) -> Result<()> {
                Err(PollmuxError::Config("bad handler".into()))
            }
        }

        let source = MockEventSource::new();
        source.push_batch(events(&[1]));
        let mut poll = PollLoop::new(source, fast_config());

        let outcome = poll.poll_once(&mut Misconfigured).await;
        match &outcome {
            CycleOutcome::Failed(e) => assert!(!e.is_recoverable()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(poll.next_delay(&outcome), poll.config().cooldown);
        assert_eq!(poll.cursor(), Cursor::start());
    }

    #[tokio::test]
    async fn test_skip_backlog_moves_cursor_without_dispatch() {
        let source = Arc::new(MockEventSource::new());
        source.push_batch(events(&[41]));
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());

        assert!(poll.start(true).await);
        assert_eq!(poll.cursor(), Cursor::at(42));
        assert_eq!(poll.stats().skipped_event, Some(41));
        assert_eq!(source.requested_cursors(), vec![Cursor::LATEST]);

        let mut handler = Recorder::default();
        poll.poll_once(&mut handler).await;
        assert!(handler.batches.is_empty());
        assert_eq!(source.requested_cursors()[1], Cursor::at(42));
    }

    #[tokio::test]
    async fn test_skip_backlog_failure_is_swallowed() {
        let source = MockEventSource::new();
        source.push_error(PollmuxError::Protocol("garbage".into()));
        let mut poll = PollLoop::new(source, fast_config());

        assert!(poll.start(true).await);
        assert!(poll.is_polling());
        assert_eq!(poll.cursor(), Cursor::start());
    }

    #[tokio::test]
    async fn test_skip_backlog_with_nothing_pending() {
        let mut poll = PollLoop::new(MockEventSource::new(), fast_config());
        assert!(poll.start(true).await);
        assert_eq!(poll.cursor(), Cursor::start());
        assert_eq!(poll.stats().skipped_event, None);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let source = Arc::new(MockEventSource::new());
        source.push_batch(events(&[41]));
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());

        assert!(poll.start(true).await);
        assert!(poll.start(true).await);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(poll.state(), PollState::Polling);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut poll = PollLoop::new(MockEventSource::new(), fast_config());
        assert!(!poll.stop());
        assert_eq!(poll.state(), PollState::Idle);

        poll.start(false).await;
        assert!(poll.stop());
        assert!(!poll.stop());
        assert_eq!(poll.state(), PollState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop_keeps_cursor() {
        let source = MockEventSource::new();
        source.push_batch(events(&[7]));
        let mut poll = PollLoop::new(source, fast_config());
        poll.start(false).await;
        poll.poll_once(&mut Recorder::default()).await;
        poll.stop();

        assert!(poll.start(false).await);
        assert_eq!(poll.cursor(), Cursor::at(8));
    }

    #[tokio::test]
    async fn test_run_without_start_returns_immediately() {
        let source = Arc::new(MockEventSource::new());
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());
        poll.run(&mut Recorder::default()).await;
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_during_dispatch_prevents_reschedule() {
        let source = Arc::new(MockEventSource::new());
        source.push_batch(events(&[1]));
        source.push_batch(events(&[2]));
        let mut poll = PollLoop::new(Arc::clone(&source), fast_config());
        let mut handler = StopAfter {
            handle: Some(poll.handle()),
            remaining: 1,
        };

        poll.start(false).await;
        poll.run(&mut handler).await;

        assert_eq!(source.fetch_count(), 1);
        assert_eq!(poll.cursor(), Cursor::at(2));
        assert_eq!(poll.state(), PollState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uses_cooldown_after_failure() {
        let source = Arc::new(MockEventSource::new());
        source.push_error(PollmuxError::Transport("down".into()));
        source.push_batch(events(&[1]));
        let config = PollConfig::new(Duration::from_millis(100))
            .with_cooldown(Duration::from_secs(5))
            .with_skip_backlog(false);
        let mut poll = PollLoop::new(Arc::clone(&source), config);
        let mut handler = StopAfter {
            handle: Some(poll.handle()),
            remaining: 1,
        };

        let started = tokio::time::Instant::now();
        poll.start(false).await;
        poll.run(&mut handler).await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(source.requested_cursors(), vec![Cursor::at(0), Cursor::at(0)]);
        assert_eq!(poll.cursor(), Cursor::at(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_stop_wakes_sleeping_loop() {
        let source = Arc::new(MockEventSource::new());
        let config = PollConfig::new(Duration::from_secs(3600)).with_skip_backlog(false);
        let mut poll = PollLoop::new(Arc::clone(&source), config);
        let handle = poll.handle();
        poll.start(false).await;

        let task = tokio::spawn(async move {
            poll.run(&mut Recorder::default()).await;
            poll
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.stop());
        let poll = task.await.unwrap();

        assert_eq!(poll.state(), PollState::Stopped);
        assert_eq!(source.fetch_count(), 1);
    }
}
