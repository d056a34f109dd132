//! aura-livewire-clock - Axia Livewire clock slave.
//!
//! Livewire masters beat a 250 us frame counter onto the wire. The
//! slave timestamps each sync datagram, compares master and local
//! positions on a 64 ms phase cycle, and disciplines a PI servo behind
//! a window-minimum filter, giving the same offset/frequency/state
//! contract as the PTP slave.

pub mod client;
pub mod packet;
pub mod servo;

use std::io;
use thiserror::Error;

pub use client::{
    frequency_ppb, is_locked, is_running, offset_ns, start, state, status, status_line, stop,
    stop_all, ClockStatus,
};
pub use packet::{ClockMaster, ClockSync};

/// Synchronization progress. The numbering is shared across all clock
/// sources so the front-end can report one state space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncState {
    #[default]
    Disabled = 0,
    Listening = 1,
    Uncalibrated = 2,
    Slave = 3,
}

/// Errors raised by the Livewire clock client.
#[derive(Debug, Error)]
pub enum LivewireError {
    /// Binding or joining the clock socket failed.
    #[error("livewire socket setup failed: {0}")]
    Socket(#[from] io::Error),
}
