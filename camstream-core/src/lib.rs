//! # CamStream Core
//!
//! Types shared by every CamStream crate: the error enum used across the
//! camera, recording and session layers, and the decoded video frame that
//! flows from the capture loop to recorders and streaming tracks.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;

// Re-export main types
pub use error::{CamStreamError, ErrorCategory, Result};
pub use frame::{PixelFormat, Resolution, VideoFrame};
