//! SessionTable - identifier -> session map with idle eviction.
//!
//! The table is only ever touched from the single active poll cycle (or
//! from shutdown after the loop has stopped), so it needs no locking.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::clock::Clock;
use crate::domain::{Event, Identity};
use crate::error::{PollmuxError, Result};
use crate::poller::BatchHandler;
use crate::session::{Session, SessionFactory};

/// A live session and its bookkeeping
struct SessionEntry<T> {
    instance: T,
    last_active_ms: u64,
}

/// Session lifecycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Sessions created (after `on_create` succeeded)
    pub created: u64,
    /// Sessions evicted by the idle sweep
    pub evicted: u64,
    /// Sessions removed manually
    pub removed: u64,
    /// Sessions torn down at shutdown
    pub closed: u64,
}

/// Map from identifier to session, owned by the registry.
pub struct SessionTable<F: SessionFactory, C: Clock> {
    factory: F,
    clock: C,
    idle_timeout: Option<Duration>,
    identity: Identity,
    sessions: HashMap<String, SessionEntry<F::Session>>,
    stats: SessionStats,
}

impl<F: SessionFactory, C: Clock> SessionTable<F, C> {
    /// Create an empty table. `None` disables idle eviction.
    pub fn new(factory: F, clock: C, idle_timeout: Option<Duration>) -> Self {
        Self {
            factory,
            clock,
            idle_timeout,
            identity: Identity::default(),
            sessions: HashMap::new(),
            stats: SessionStats::default(),
        }
    }

    /// Identity handed to the factory for every new session
    pub fn bind_identity(&mut self, identity: Identity) {
        self.identity = identity;
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.sessions.contains_key(identifier)
    }

    /// Borrow a live session
    pub fn get(&self, identifier: &str) -> Option<&F::Session> {
        self.sessions.get(identifier).map(|entry| &entry.instance)
    }

    /// Last activity time of a live session
    pub fn last_active_ms(&self, identifier: &str) -> Option<u64> {
        self.sessions.get(identifier).map(|entry| entry.last_active_ms)
    }

    /// Live identifiers, sorted
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route every event to its session, strictly in order.
    ///
    /// Stops at the first hook error and returns it.
    pub async fn dispatch(&mut self, events: &[Event]) -> Result<()> {
        for event in events {
            let identifier = self.factory.identify(event);

            if !self.sessions.contains_key(&identifier) {
                let mut entry = SessionEntry {
                    instance: self.factory.create(&identifier, &self.identity),
                    last_active_ms: 0,
                };
                entry
                    .instance
                    .on_create()
                    .await
                    .map_err(|e| PollmuxError::session(&identifier, e))?;
                self.sessions.insert(identifier.clone(), entry);
                self.stats.created += 1;
                log::info!("Session {} created", identifier);
            }

            if let Some(entry) = self.sessions.get_mut(&identifier) {
                entry
                    .instance
                    .process_event(event)
                    .await
                    .map_err(|e| PollmuxError::session(&identifier, e))?;
                entry.last_active_ms = self.clock.now_ms();
            }
        }
        Ok(())
    }

    /// Evict every session idle for at least the idle timeout.
    ///
    /// Returns the number evicted. A no-op when eviction is disabled.
    pub async fn sweep(&mut self) -> Result<usize> {
        let Some(timeout) = self.idle_timeout else {
            return Ok(0);
        };
        let timeout_ms = timeout.as_millis() as u64;
        let now = self.clock.now_ms();

        let mut idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.last_active_ms) >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();

        for identifier in &idle {
            self.retire(identifier).await?;
            self.stats.evicted += 1;
            log::info!("Session {} evicted after {}ms idle", identifier, timeout_ms);
        }
        Ok(idle.len())
    }

    /// Remove one session, calling its `on_remove`. Returns false if absent.
    pub async fn remove(&mut self, identifier: &str) -> Result<bool> {
        if !self.sessions.contains_key(identifier) {
            return Ok(false);
        }
        self.retire(identifier).await?;
        self.stats.removed += 1;
        log::info!("Session {} removed", identifier);
        Ok(true)
    }

    /// Tear down every live session.
    ///
    /// Every session is removed even if its `on_remove` fails; the first
    /// failure is returned after all sessions are gone.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut first_error = None;
        let identifiers = self.identifiers();

        for identifier in &identifiers {
            if let Some(mut entry) = self.sessions.remove(identifier) {
                if let Err(e) = entry.instance.on_remove().await {
                    log::error!("Session {} failed during shutdown: {}", identifier, e);
                    first_error.get_or_insert(PollmuxError::session(identifier, e));
                }
                self.stats.closed += 1;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(identifiers.len()),
        }
    }

    /// Call `on_remove`, then drop the entry. On error the entry stays.
    async fn retire(&mut self, identifier: &str) -> Result<()> {
        if let Some(entry) = self.sessions.get_mut(identifier) {
            entry
                .instance
                .on_remove()
                .await
                .map_err(|e| PollmuxError::session(identifier, e))?;
        }
        self.sessions.remove(identifier);
        Ok(())
    }
}

#[async_trait]
impl<F, C> BatchHandler for SessionTable<F, C>
where
    F: SessionFactory,
    C: Clock,
{
    async fn on_batch(&mut self, events: &[Event]) -> Result<()> {
        self.dispatch(events).await?;
        self.sweep().await?;
        Ok(())
    }
}
