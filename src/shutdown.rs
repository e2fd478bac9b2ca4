//! Shutdown signal
//!
//! An external cancellation signal delivered to the registry. It can be
//! triggered any number of times from any task, but only the first trigger
//! counts, so the shutdown sequence runs at most once. OS signals are just
//! one way of triggering it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Inner {
    triggered: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Once-only cancellation signal, shared between clones.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Request shutdown. Returns true only for the first call.
    pub fn trigger(&self) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Spawn a task that triggers shutdown on Ctrl-C, and on SIGTERM on unix.
    ///
    /// Repeated signals are logged and otherwise ignored.
    pub fn listen_for_os_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            let mut signals = OsSignals::new();
            loop {
                match signals.recv().await {
                    Ok(name) => {
                        if shutdown.trigger() {
                            log::info!("Received {}, shutting down", name);
                        } else {
                            log::warn!("Received {} again, shutdown already in progress", name);
                        }
                    }
                    Err(e) => {
                        log::error!("Failed to listen for OS signals: {}", e);
                        return;
                    }
                }
            }
        })
    }
}

struct OsSignals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl OsSignals {
    fn new() -> Self {
        Self {
            #[cfg(unix)]
            terminate: Self::terminate_signal(),
        }
    }

    #[cfg(unix)]
    fn terminate_signal() -> Option<tokio::signal::unix::Signal> {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {}", e);
                None
            }
        }
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        match self.terminate.as_mut() {
            Some(terminate) => tokio::select! {
                result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
                _ = terminate.recv() => Ok("SIGTERM"),
            },
            None => tokio::signal::ctrl_c().await.map(|_| "SIGINT"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|_| "Ctrl-C")
    }
}
