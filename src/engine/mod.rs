//! Audio Engine Module
//!
//! The audio boundary and the per-block signal chain:
//! - Audio buffer management and dB conversions
//! - Fixed-order signal chain driven by the published snapshot

pub mod buffer;
pub mod chain;

pub use buffer::{db_to_linear, linear_to_db, AudioBuffer};
pub use chain::SignalChain;
