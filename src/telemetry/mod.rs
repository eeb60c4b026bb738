//! # Telemetry Module
//!
//! Persists scheduler status events to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting status events as JSONL (JSON Lines) with timestamps
//! - Writing to rotating files (max N records per file)
//! - Retaining only the last M files
//! - Draining the scheduler's observer channel on a dedicated thread

pub mod journal;

pub use journal::{spawn_writer, EventJournal};
