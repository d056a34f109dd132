//! aura-ptp - IEEE 1588v2 PTP slave library for AES67 audio.
//!
//! Tracks offset and frequency against a network grandmaster using the
//! end-to-end delay mechanism. Software-only: the OS clock is never
//! stepped, so offsets are reported relative to the first measurement.

pub mod client;
pub mod messages;
pub mod platform;
pub mod servo;
pub mod stats;

use std::io;
use thiserror::Error;

pub use client::{
    frequency_ppb, is_locked, is_running, offset_ns, start, state, stats, stop, stop_all,
};
pub use stats::{PtpState, PtpStats};

/// Errors raised by the PTP client.
#[derive(Debug, Error)]
pub enum PtpError {
    /// Binding or joining the event/general sockets failed.
    #[error("ptp socket setup failed: {0}")]
    Socket(#[from] io::Error),
    /// The client mutex was poisoned by a panicking thread.
    #[error("ptp client state unavailable")]
    State,
}
