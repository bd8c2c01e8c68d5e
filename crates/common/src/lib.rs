//! Findr Common Utilities
//!
//! Shared infrastructure for all Findr crates:
//! - Error taxonomy and result aliases
//! - Stream clock and frame-rate measurement
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
