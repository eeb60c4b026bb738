//! # Dispatch Module
//!
//! Single-threaded cooperative run loop.
//!
//! One [`EventQueue`] owns a timer queue and a posted-event channel; its
//! [`EventQueue::dispatch_forever`] runs every callback to completion on the
//! calling task, so handlers never overlap and need no locking. Handlers
//! re-arm themselves by scheduling new callbacks from inside a callback.

mod queue;

pub use queue::{EventHandler, EventQueue, TimerHandle};
