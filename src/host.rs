//! Sessions used by the `pollmux run` command.
//!
//! Every identifier gets a session that logs what it receives. Useful for
//! watching a queue before wiring in real session logic.

use async_trait::async_trait;
use colored::*;
use log::info;

use pollmux::domain::{Event, Identity};
use pollmux::registry::LifecycleHooks;
use pollmux::session::{PointerIdentifier, Session, SessionFactory};

/// Session that logs every event routed to it
pub struct LoggingSession {
    identifier: String,
    received: u64,
    echo: bool,
}

#[async_trait]
impl Session for LoggingSession {
    async fn on_create(&mut self) -> pollmux::Result<()> {
        info!("[{}] session opened", self.identifier);
        Ok(())
    }

    async fn process_event(&mut self, event: &Event) -> pollmux::Result<()> {
        self.received += 1;
        let text = event
            .payload
            .pointer("/message/text")
            .and_then(|v| v.as_str())
            .unwrap_or("<non-text event>");
        info!("[{}] event {}: {}", self.identifier, event.event_id, text);
        if self.echo {
            println!("{} {} {}", self.identifier.cyan(), event.event_id, text);
        }
        Ok(())
    }

    async fn on_remove(&mut self) -> pollmux::Result<()> {
        info!("[{}] session closed after {} events", self.identifier, self.received);
        Ok(())
    }
}

/// Builds a [`LoggingSession`] per identifier
pub struct LoggingFactory {
    identifier: PointerIdentifier,
    echo: bool,
}

impl LoggingFactory {
    pub fn new(identifier: PointerIdentifier, echo: bool) -> Self {
        Self { identifier, echo }
    }
}

impl SessionFactory for LoggingFactory {
    type Session = LoggingSession;

    fn identify(&self, event: &Event) -> String {
        self.identifier.identify(event)
    }

    fn create(&mut self, identifier: &str, _identity: &Identity) -> LoggingSession {
        LoggingSession {
            identifier: identifier.to_string(),
            received: 0,
            echo: self.echo,
        }
    }
}

/// Prints start and stop banners
pub struct ConsoleHooks;

#[async_trait]
impl LifecycleHooks for ConsoleHooks {
    async fn on_start(&mut self) -> pollmux::Result<()> {
        println!("{}", "Starting poller (Ctrl-C to stop)...".cyan());
        Ok(())
    }

    async fn on_stop(&mut self) -> pollmux::Result<()> {
        println!("{}", "Poller stopped".yellow());
        Ok(())
    }
}
