//! Domain types for pollmux
//!
//! - Event: one record pulled from the remote stream
//! - Cursor: the offset separating delivered events from pending ones
//! - Identity: who this client is, resolved once at startup

pub mod event;

pub use event::{Cursor, Event, Identity};
