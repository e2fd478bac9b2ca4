//! Poll loop - cursor management and the fetch/dispatch/reschedule cycle
//!
//! The loop:
//! - Optionally skips the backlog that existed before startup
//! - Fetches the next batch after the cursor and hands it to a handler
//! - Advances the cursor only after the handler succeeds
//! - Backs off with a cooldown interval after any failed cycle

pub mod poll_loop;
pub mod stats;

pub use poll_loop::*;
pub use stats::PollStats;
