//! AES67 input: multicast RTP reception, jitter buffering, host pull.

pub mod jitter;
pub mod rtp;
pub mod stream;
pub mod url;

pub use stream::Aes67Stream;
pub use url::Aes67Url;
