//! Session registry - startup, batch routing and shutdown around one poll loop
//!
//! Startup: start hook, resolve our own identity, then start polling with
//! the session table as the batch handler. Shutdown runs once, whether it
//! was requested by an OS signal, a [`Shutdown`] handle or an explicit call:
//! stop polling, tear down every live session, run the stop hook, return.
//! The registry never exits the process itself.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::domain::{Cursor, Event, Identity};
use crate::error::{PollmuxError, Result};
use crate::poller::{BatchHandler, PollConfig, PollLoop, PollStats};
use crate::session::{SessionFactory, SessionStats, SessionTable};
use crate::shutdown::Shutdown;
use crate::source::EventSource;

/// Default idle eviction timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration for the registry and its poll loop
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub poll: PollConfig,
    /// `None` disables idle eviction
    pub idle_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl RegistryConfig {
    pub fn new(poll: PollConfig) -> Self {
        Self {
            poll,
            ..Default::default()
        }
    }

    /// Set the idle timeout (`None` disables eviction)
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Host hooks around the registry lifetime. Both default to no-ops.
#[async_trait]
pub trait LifecycleHooks: Send {
    /// Called before identity resolution
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called last during shutdown, after every session is gone
    async fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl LifecycleHooks for () {}

/// What a registry did over its lifetime, returned when it is ready to exit.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub identity: Option<Identity>,
    pub cursor: Cursor,
    pub poll: PollStats,
    pub sessions: SessionStats,
}

/// Owns the identifier -> session map and the poll loop feeding it.
pub struct SessionRegistry<S: EventSource, F: SessionFactory, C: Clock = SystemClock> {
    poller: PollLoop<S>,
    sessions: SessionTable<F, C>,
    shutdown: Shutdown,
    identity: Option<Identity>,
    finished: bool,
}

impl<S: EventSource, F: SessionFactory> SessionRegistry<S, F, SystemClock> {
    /// Create a registry on the wall clock
    pub fn new(source: S, factory: F, config: RegistryConfig) -> Self {
        Self::with_clock(source, factory, config, SystemClock)
    }
}

impl<S: EventSource, F: SessionFactory, C: Clock> SessionRegistry<S, F, C> {
    /// Create a registry reading time from `clock`
    pub fn with_clock(source: S, factory: F, config: RegistryConfig, clock: C) -> Self {
        Self {
            poller: PollLoop::new(source, config.poll),
            sessions: SessionTable::new(factory, clock, config.idle_timeout),
            shutdown: Shutdown::new(),
            identity: None,
            finished: false,
        }
    }

    /// Use an existing shutdown signal, e.g. one shared by several
    /// registries that shard identifiers between them
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Identity resolved at startup
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Shutdown signal for this registry; triggering it stops `run`/`serve`
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn cursor(&self) -> Cursor {
        self.poller.cursor()
    }

    /// Number of live sessions
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, identifier: &str) -> bool {
        self.sessions.contains(identifier)
    }

    /// Borrow a live session
    pub fn session(&self, identifier: &str) -> Option<&F::Session> {
        self.sessions.get(identifier)
    }

    /// Whether the shutdown sequence has completed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Route one batch to sessions and sweep idle ones.
    pub async fn on_batch(&mut self, events: &[Event]) -> Result<()> {
        self.sessions.on_batch(events).await
    }

    /// Evict idle sessions now
    pub async fn sweep(&mut self) -> Result<usize> {
        self.sessions.sweep().await
    }

    /// Remove a session by hand, calling its `on_remove`
    pub async fn remove_session(&mut self, identifier: &str) -> Result<bool> {
        self.sessions.remove(identifier).await
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            identity: self.identity.clone(),
            cursor: self.poller.cursor(),
            poll: self.poller.stats().clone(),
            sessions: self.sessions.stats().clone(),
        }
    }

    /// Run until Ctrl-C/SIGTERM or until the shutdown handle is triggered.
    pub async fn run<H: LifecycleHooks + ?Sized>(&mut self, hooks: &mut H) -> Result<RunSummary> {
        let listener = self.shutdown.listen_for_os_signals();
        let result = self.serve(hooks).await;
        listener.abort();
        result
    }

    /// Like [`run`](Self::run) but without OS signal handling.
    pub async fn serve<H: LifecycleHooks + ?Sized>(&mut self, hooks: &mut H) -> Result<RunSummary> {
        if let Err(e) = hooks.on_start().await {
            log::error!("Start hook failed, not polling: {}", e);
            self.shutdown(hooks).await?;
            return Err(PollmuxError::Hook(e.to_string()));
        }

        let resolved = {
            let fetch_timeout = self.poller.config().fetch_timeout;
            let resolve = tokio::time::timeout(fetch_timeout, self.poller.source().resolve_identity());
            let shutdown = self.shutdown.clone();
            tokio::select! {
                biased;
                _ = shutdown.wait() => None,
                result = resolve => Some(result),
            }
        };

        let identity = match resolved {
            Some(Ok(Ok(identity))) => identity,
            Some(Ok(Err(e))) => return self.abort_startup(hooks, e.to_string()).await,
            Some(Err(_)) => return self.abort_startup(hooks, "identity request timed out".to_string()).await,
            None => {
                log::info!("Shutdown requested during startup");
                return self.shutdown(hooks).await;
            }
        };

        log::info!("Running as {}", identity);
        self.sessions.bind_identity(identity.clone());
        self.identity = Some(identity);

        let skip_backlog = self.poller.config().skip_backlog;
        self.poller.start(skip_backlog).await;

        let bridge = {
            let poll_handle = self.poller.handle();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                shutdown.wait().await;
                poll_handle.stop();
            })
        };

        if self.shutdown.is_triggered() {
            self.poller.stop();
        }
        self.poller.run(&mut self.sessions).await;
        bridge.abort();

        self.shutdown(hooks).await
    }

    async fn abort_startup<H: LifecycleHooks + ?Sized>(
        &mut self,
        hooks: &mut H,
        reason: String,
    ) -> Result<RunSummary> {
        log::error!("Failed to resolve identity, not polling: {}", reason);
        self.shutdown(hooks).await?;
        Err(PollmuxError::Identity(reason))
    }

    /// Stop polling, tear down every session, then run the stop hook.
    ///
    /// Runs at most once; later calls return the summary without side effects.
    pub async fn shutdown<H: LifecycleHooks + ?Sized>(&mut self, hooks: &mut H) -> Result<RunSummary> {
        if self.finished {
            return Ok(self.summary());
        }
        self.finished = true;
        self.shutdown.trigger();
        self.poller.stop();

        log::info!("Shutting down with {} live sessions", self.sessions.len());
        let drained = self.sessions.drain().await;
        let stopped = hooks.on_stop().await;
        log::info!("Shutdown complete at cursor {}", self.poller.cursor());

        drained?;
        stopped.map_err(|e| PollmuxError::Hook(e.to_string()))?;
        Ok(self.summary())
    }
}
