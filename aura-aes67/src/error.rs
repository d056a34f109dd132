//! Add-on error type, mapping 1:1 onto the host error code space.

use thiserror::Error;

use crate::host::engine::*;

/// Everything a public add-on operation can fail with. Network-level
/// faults (a lost datagram, a malformed packet) are stats, not errors,
/// and never surface here.
#[derive(Debug, Error)]
pub enum Aes67Error {
    #[error("out of memory")]
    Mem,
    #[error("invalid parameter: {0}")]
    IllParam(String),
    #[error("position not available on a live stream")]
    Position,
    #[error("not available")]
    NotAvail,
    #[error("already running")]
    Already,
    #[error("host engine ABI too old")]
    Version,
    #[error("clock is not running")]
    NoClock,
    #[error("socket initialization failed: {0}")]
    Init(String),
    #[error("{0}")]
    Unknown(String),
}

impl Aes67Error {
    /// The host error code reported through the error-set primitive.
    pub fn host_code(&self) -> i32 {
        match self {
            Aes67Error::Mem => AURA_ERROR_MEM,
            Aes67Error::IllParam(_) => AURA_ERROR_ILLPARAM,
            Aes67Error::Position => AURA_ERROR_POSITION,
            Aes67Error::NotAvail => AURA_ERROR_NOTAVAIL,
            Aes67Error::Already => AURA_ERROR_ALREADY,
            Aes67Error::Version => AURA_ERROR_VERSION,
            Aes67Error::NoClock => AURA_ERROR_NO_CLOCK,
            Aes67Error::Init(_) => AURA_ERROR_INIT,
            Aes67Error::Unknown(_) => AURA_ERROR_UNKNOWN,
        }
    }

    pub fn ill_param(what: impl Into<String>) -> Self {
        Aes67Error::IllParam(what.into())
    }
}

impl From<std::io::Error> for Aes67Error {
    fn from(e: std::io::Error) -> Self {
        Aes67Error::Init(e.to_string())
    }
}

impl From<aura_ptp::PtpError> for Aes67Error {
    fn from(e: aura_ptp::PtpError) -> Self {
        Aes67Error::Init(e.to_string())
    }
}

impl From<aura_livewire_clock::LivewireError> for Aes67Error {
    fn from(e: aura_livewire_clock::LivewireError) -> Self {
        Aes67Error::Init(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_host_space() {
        assert_eq!(Aes67Error::Mem.host_code(), 1);
        assert_eq!(Aes67Error::ill_param("x").host_code(), 19);
        assert_eq!(Aes67Error::NotAvail.host_code(), 37);
        assert_eq!(Aes67Error::NoClock.host_code(), 0x2000);
    }
}
