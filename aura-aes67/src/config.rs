//! Process-wide configuration registry.
//!
//! A fixed enumeration of typed options behind one lock. The FFI config
//! callback in `lib.rs` dispatches host set/get calls here; everything
//! below is plain Rust and directly testable.

use std::net::Ipv4Addr;

use parking_lot::RwLock;

use crate::clock::ClockMode;
use crate::error::Aes67Error;
use crate::host::engine::DWORD;

// Option codes, in the add-on config space of the host.
pub const AURA_CONFIG_AES67_PT: DWORD = 0x20000;
pub const AURA_CONFIG_AES67_INTERFACE: DWORD = 0x20001;
pub const AURA_CONFIG_AES67_JITTER: DWORD = 0x20002;
pub const AURA_CONFIG_AES67_PTP_DOMAIN: DWORD = 0x20003;
pub const AURA_CONFIG_AES67_PTP_STATS: DWORD = 0x20004;
pub const AURA_CONFIG_AES67_PTP_OFFSET: DWORD = 0x20005;
pub const AURA_CONFIG_AES67_PTP_STATE: DWORD = 0x20006;
pub const AURA_CONFIG_AES67_PTP_ENABLED: DWORD = 0x20007;
pub const AURA_CONFIG_AES67_BUFFER_LEVEL: DWORD = 0x20010;
pub const AURA_CONFIG_AES67_JITTER_UNDERRUNS: DWORD = 0x20011;
pub const AURA_CONFIG_AES67_PACKETS_RECEIVED: DWORD = 0x20012;
pub const AURA_CONFIG_AES67_PACKETS_LATE: DWORD = 0x20013;
pub const AURA_CONFIG_AES67_BUFFER_PACKETS: DWORD = 0x20014;
pub const AURA_CONFIG_AES67_TARGET_PACKETS: DWORD = 0x20015;
pub const AURA_CONFIG_AES67_PACKET_TIME: DWORD = 0x20016;
pub const AURA_CONFIG_AES67_PTP_LOCKED: DWORD = 0x20017;
pub const AURA_CONFIG_AES67_PTP_FREQ: DWORD = 0x20018;
pub const AURA_CONFIG_AES67_CLOCK_MODE: DWORD = 0x20019;
pub const AURA_CONFIG_AES67_CLOCK_FALLBACK_TIMEOUT: DWORD = 0x2001A;

/// Writable options with their defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Expected RTP payload type on RX.
    pub payload_type: u32,
    /// Local interface for multicast join and TX source. None = kernel
    /// default (0.0.0.0).
    pub interface: Option<Ipv4Addr>,
    /// Target jitter buffer depth in milliseconds.
    pub jitter_ms: u32,
    pub ptp_domain: u32,
    pub ptp_enabled: bool,
    pub clock_mode: ClockMode,
    /// Seconds without Sync before falling back to the system clock.
    /// 0 disables the fallback.
    pub fallback_timeout_s: u32,
}

impl Settings {
    const fn defaults() -> Self {
        Self {
            payload_type: 96,
            interface: None,
            jitter_ms: 10,
            ptp_domain: 0,
            ptp_enabled: true,
            clock_mode: ClockMode::Ptp,
            fallback_timeout_s: 5,
        }
    }
}

static SETTINGS: RwLock<Settings> = RwLock::new(Settings::defaults());

/// A consistent copy of the current settings.
pub fn snapshot() -> Settings {
    SETTINGS.read().clone()
}

pub fn set_payload_type(pt: u32) -> Result<(), Aes67Error> {
    if pt > 127 {
        return Err(Aes67Error::ill_param("payload type must be 0-127"));
    }
    SETTINGS.write().payload_type = pt;
    Ok(())
}

pub fn set_jitter_ms(ms: u32) -> Result<(), Aes67Error> {
    if ms == 0 || ms > 1000 {
        return Err(Aes67Error::ill_param("jitter depth must be 1-1000 ms"));
    }
    SETTINGS.write().jitter_ms = ms;
    Ok(())
}

pub fn set_ptp_domain(domain: u32) -> Result<(), Aes67Error> {
    if domain > 127 {
        return Err(Aes67Error::ill_param("PTP domain must be 0-127"));
    }
    SETTINGS.write().ptp_domain = domain;
    Ok(())
}

pub fn set_ptp_enabled(enabled: bool) {
    SETTINGS.write().ptp_enabled = enabled;
}

pub fn set_clock_mode(mode: u32) -> Result<(), Aes67Error> {
    let mode = ClockMode::try_from(mode)?;
    SETTINGS.write().clock_mode = mode;
    Ok(())
}

pub fn set_fallback_timeout(secs: u32) {
    SETTINGS.write().fallback_timeout_s = secs;
    crate::clock::set_fallback_timeout(secs);
}

/// Set the interface from its dotted-quad form. An empty string or
/// 0.0.0.0 selects the kernel default.
pub fn set_interface(addr: &str) -> Result<(), Aes67Error> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        SETTINGS.write().interface = None;
        return Ok(());
    }
    let parsed: Ipv4Addr = trimmed
        .parse()
        .map_err(|_| Aes67Error::ill_param("interface must be a dotted-quad IPv4 address"))?;
    SETTINGS.write().interface = if parsed.is_unspecified() {
        None
    } else {
        Some(parsed)
    };
    Ok(())
}

/// Dotted-quad form of the configured interface, empty when unset.
pub fn interface_string() -> String {
    SETTINGS
        .read()
        .interface
        .map(|a| a.to_string())
        .unwrap_or_default()
}

/// Serializes tests that mutate the process-wide settings.
#[cfg(test)]
pub(crate) static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_keys_round_trip() {
        let _guard = TEST_LOCK.lock();
        set_payload_type(98).unwrap();
        set_jitter_ms(20).unwrap();
        set_ptp_domain(4).unwrap();
        set_ptp_enabled(false);
        set_clock_mode(2).unwrap();
        set_fallback_timeout(9);
        set_interface("192.168.60.102").unwrap();

        let s = snapshot();
        assert_eq!(s.payload_type, 98);
        assert_eq!(s.jitter_ms, 20);
        assert_eq!(s.ptp_domain, 4);
        assert!(!s.ptp_enabled);
        assert_eq!(s.clock_mode, ClockMode::System);
        assert_eq!(s.fallback_timeout_s, 9);
        assert_eq!(interface_string(), "192.168.60.102");

        // Back to defaults for other tests in this process.
        set_payload_type(96).unwrap();
        set_jitter_ms(10).unwrap();
        set_ptp_domain(0).unwrap();
        set_ptp_enabled(true);
        set_clock_mode(0).unwrap();
        set_fallback_timeout(5);
        set_interface("").unwrap();
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(set_payload_type(128).is_err());
        assert!(set_jitter_ms(0).is_err());
        assert!(set_jitter_ms(5000).is_err());
        assert!(set_ptp_domain(200).is_err());
        assert!(set_clock_mode(3).is_err());
        assert!(set_interface("not-an-address").is_err());
    }

    #[test]
    fn unspecified_interface_means_default() {
        let _guard = TEST_LOCK.lock();
        set_interface("0.0.0.0").unwrap();
        assert_eq!(snapshot().interface, None);
    }
}
