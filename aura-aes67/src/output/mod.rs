//! AES67 output: host channel pull, RTP packetization, clock-paced send.

pub mod rtp;
pub mod stream;

pub use stream::{Aes67OutputConfig, Aes67OutputStream, OutputStats, SampleSource};
