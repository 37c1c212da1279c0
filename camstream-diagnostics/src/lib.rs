//! # CamStream Diagnostics
//!
//! Logging setup and periodic system reporting for CamStream.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod stats_reporter;

// Re-export main types
pub use debug_logger::DebugLogger;
pub use stats_reporter::{StatsReporter, SystemSnapshot};
