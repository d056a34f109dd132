//! Aura host engine interface.
//!
//! `engine` holds the ABI types shared with the host, `addon` the
//! callback tables exchanged at plugin load.

pub mod addon;
pub mod engine;

pub use addon::*;
pub use engine::*;
