//! # Payload Module
//!
//! Cayenne Low Power Payload (LPP) encoding for uplinks.
//!
//! This module handles:
//! - Appending typed measurements to a size-bounded buffer
//! - Decoding LPP buffers back into records (reference decoder)

pub mod decoder;
pub mod lpp;

pub use lpp::CayenneLpp;
