//! pollmux - long-poll event pump with per-actor sessions
//!
//! A [`PollLoop`](poller::PollLoop) repeatedly pulls batches from a remote
//! queue, advancing a cursor only after each batch has been handled. A
//! [`SessionRegistry`](registry::SessionRegistry) routes every event to a
//! lazily created per-identifier session, evicts idle sessions, and owns the
//! startup and shutdown sequence.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod poller;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod source;

pub use error::{PollmuxError, Result};
