//! Aura AES67 Plugin
//!
//! AES67 network audio endpoint for the Aura audio engine.
//! - Input: receive AES67 RTP multicast streams and play them through
//!   the host (aes67:// URLs)
//! - Output: pull PCM from a host channel and transmit AES67 RTP
//!   multicast
//! - Clock: process-wide PTP / Livewire / system timebase shared by
//!   both directions
//!
//! The host calls `AURA_AES67_PluginInit` with its function table at
//! load; everything else flows through the plugin faces and the config
//! registry.

pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod input;
pub mod output;

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::net::Ipv4Addr;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::warn;

pub use clock::{ClockMode, ClockState};
pub use error::Aes67Error;
pub use input::{Aes67Stream, Aes67Url};
pub use output::{Aes67OutputConfig, Aes67OutputStream, OutputStats, SampleSource};

use host::*;
use input::stream::{stream_proc, ADDON_FUNCS};

/// Plugin version (host version format 0xAABBCCDD).
const VERSION: DWORD = 0x02040000;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

// Raw stream pointer that can sit in the registry map. Lifetime is
// managed at the FFI boundary: registered after creation, removed in
// the free callback, all access through the RwLock.
#[derive(Clone, Copy)]
struct StreamPtr(*mut Aes67Stream);
unsafe impl Send for StreamPtr {}
unsafe impl Sync for StreamPtr {}

lazy_static! {
    /// Handle -> stream map backing the read-only config keys.
    static ref STREAM_REGISTRY: RwLock<HashMap<HSTREAM, StreamPtr>> =
        RwLock::new(HashMap::new());
}

fn register_stream(handle: HSTREAM, stream: *mut Aes67Stream) {
    STREAM_REGISTRY.write().insert(handle, StreamPtr(stream));
}

/// Remove a stream from the registry (free callback).
pub fn unregister_stream(handle: HSTREAM) {
    STREAM_REGISTRY.write().remove(&handle);
}

/// Any registered stream, for stats queries that take no handle.
fn get_any_stream() -> Option<*mut Aes67Stream> {
    STREAM_REGISTRY.read().values().next().map(|p| p.0)
}

static PLUGIN_FORMATS: [AuraPluginForm; 1] = [AuraPluginForm {
    ctype: AURA_CTYPE_STREAM_AES67,
    name: b"AES67 Network Audio\0".as_ptr() as *const i8,
    exts: b"aes67://\0".as_ptr() as *const i8,
}];

static PLUGIN_INFO: AuraPluginInfo = AuraPluginInfo {
    version: VERSION,
    formatc: 1,
    formats: PLUGIN_FORMATS.as_ptr(),
};

/// Report an error to the host and fail the config call.
unsafe fn config_fail(e: Aes67Error) -> BOOL {
    set_error(e.host_code());
    FALSE
}

/// Config callback dispatching the add-on option table.
unsafe extern "system" fn config_handler(option: DWORD, flags: DWORD, value: *mut c_void) -> BOOL {
    use config::*;

    let is_set = (flags & AURACONFIG_SET) != 0;
    let is_ptr = (flags & AURACONFIG_PTR) != 0;

    match option {
        AURA_CONFIG_AES67_PT => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                if let Err(e) = set_payload_type(*dvalue) {
                    return config_fail(e);
                }
            } else {
                *dvalue = snapshot().payload_type;
            }
            TRUE
        }
        AURA_CONFIG_AES67_JITTER => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                if let Err(e) = set_jitter_ms(*dvalue) {
                    return config_fail(e);
                }
            } else {
                *dvalue = snapshot().jitter_ms;
            }
            TRUE
        }
        AURA_CONFIG_AES67_INTERFACE => {
            if !is_ptr {
                return FALSE;
            }
            if is_set {
                let cstr = CStr::from_ptr(value as *const i8);
                match cstr.to_str() {
                    Ok(s) => {
                        if let Err(e) = set_interface(s) {
                            return config_fail(e);
                        }
                    }
                    Err(_) => return config_fail(Aes67Error::ill_param("interface string")),
                }
            } else {
                static mut INTERFACE_BUFFER: [u8; 64] = [0; 64];
                let s = interface_string();
                let bytes = s.as_bytes();
                let len = bytes.len().min(63);
                let dst = ptr::addr_of_mut!(INTERFACE_BUFFER) as *mut u8;
                ptr::copy_nonoverlapping(bytes.as_ptr(), dst, len);
                *dst.add(len) = 0;
                *(value as *mut *const u8) = dst as *const u8;
            }
            TRUE
        }
        AURA_CONFIG_AES67_PTP_DOMAIN => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                if let Err(e) = set_ptp_domain(*dvalue) {
                    return config_fail(e);
                }
            } else {
                *dvalue = snapshot().ptp_domain;
            }
            TRUE
        }
        AURA_CONFIG_AES67_PTP_ENABLED => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                set_ptp_enabled(*dvalue != 0);
            } else {
                *dvalue = snapshot().ptp_enabled as DWORD;
            }
            TRUE
        }
        AURA_CONFIG_AES67_CLOCK_MODE => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                if let Err(e) = set_clock_mode(*dvalue) {
                    return config_fail(e);
                }
            } else {
                *dvalue = snapshot().clock_mode as DWORD;
            }
            TRUE
        }
        AURA_CONFIG_AES67_CLOCK_FALLBACK_TIMEOUT => {
            if is_ptr {
                return FALSE;
            }
            let dvalue = value as *mut DWORD;
            if is_set {
                set_fallback_timeout(*dvalue);
            } else {
                *dvalue = snapshot().fallback_timeout_s;
            }
            TRUE
        }
        AURA_CONFIG_AES67_PTP_STATS => {
            if is_set || !is_ptr {
                return FALSE;
            }
            if clock::state() == ClockState::Disabled {
                return config_fail(Aes67Error::NoClock);
            }
            static mut STATS_BUFFER: [u8; 256] = [0; 256];
            let stats = clock::stats_string();
            let bytes = stats.as_bytes();
            let len = bytes.len().min(255);
            let dst = ptr::addr_of_mut!(STATS_BUFFER) as *mut u8;
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst, len);
            *dst.add(len) = 0;
            *(value as *mut *const i8) = dst as *const i8;
            TRUE
        }
        AURA_CONFIG_AES67_PTP_OFFSET => {
            if is_set || is_ptr {
                return FALSE;
            }
            if clock::state() == ClockState::Disabled {
                return config_fail(Aes67Error::NoClock);
            }
            *(value as *mut i64) = clock::offset_ns();
            TRUE
        }
        AURA_CONFIG_AES67_PTP_STATE => {
            if is_set || is_ptr {
                return FALSE;
            }
            *(value as *mut DWORD) = clock::state() as DWORD;
            TRUE
        }
        AURA_CONFIG_AES67_PTP_LOCKED => {
            if is_set || is_ptr {
                return FALSE;
            }
            *(value as *mut DWORD) = clock::is_locked() as DWORD;
            TRUE
        }
        AURA_CONFIG_AES67_PTP_FREQ => {
            if is_set || is_ptr {
                return FALSE;
            }
            if clock::state() == ClockState::Disabled {
                return config_fail(Aes67Error::NoClock);
            }
            *(value as *mut i32) = clock::ppm_x1000();
            TRUE
        }
        AURA_CONFIG_AES67_BUFFER_LEVEL => {
            if is_set || is_ptr {
                return FALSE;
            }
            let level = match get_any_stream() {
                Some(s) => (*s).buffer_fill_percent(),
                None => 100, // at target when idle
            };
            *(value as *mut DWORD) = level;
            TRUE
        }
        AURA_CONFIG_AES67_BUFFER_PACKETS => {
            if is_set || is_ptr {
                return FALSE;
            }
            let packets = match get_any_stream() {
                Some(s) => (*s).buffer_packets() as DWORD,
                None => 0,
            };
            *(value as *mut DWORD) = packets;
            TRUE
        }
        AURA_CONFIG_AES67_TARGET_PACKETS => {
            if is_set || is_ptr {
                return FALSE;
            }
            let target = match get_any_stream() {
                Some(s) => (*s).target_packets() as DWORD,
                None => 0,
            };
            *(value as *mut DWORD) = target;
            TRUE
        }
        AURA_CONFIG_AES67_JITTER_UNDERRUNS => {
            if is_set || is_ptr {
                return FALSE;
            }
            let underruns = match get_any_stream() {
                Some(s) => (*s).jitter_underruns(),
                None => 0,
            };
            *(value as *mut u64) = underruns;
            TRUE
        }
        AURA_CONFIG_AES67_PACKETS_RECEIVED => {
            if is_set || is_ptr {
                return FALSE;
            }
            let received = match get_any_stream() {
                Some(s) => (*s).packets_received(),
                None => 0,
            };
            *(value as *mut u64) = received;
            TRUE
        }
        AURA_CONFIG_AES67_PACKETS_LATE => {
            if is_set || is_ptr {
                return FALSE;
            }
            let late = match get_any_stream() {
                Some(s) => (*s).packets_late(),
                None => 0,
            };
            *(value as *mut u64) = late;
            TRUE
        }
        AURA_CONFIG_AES67_PACKET_TIME => {
            if is_set || is_ptr {
                return FALSE;
            }
            let packet_time = match get_any_stream() {
                Some(s) => (*s).detected_packet_time_us(),
                None => 0,
            };
            *(value as *mut DWORD) = packet_time;
            TRUE
        }
        _ => FALSE,
    }
}

/// URL stream creation callback for aes67:// URLs, e.g.
/// aes67://239.192.76.52:5004?iface=192.168.60.102&pt=96
unsafe extern "system" fn stream_create_url(
    url: *const i8,
    _offset: DWORD,
    flags: DWORD,
    _proc: Option<DownloadProc>,
    _user: *mut c_void,
) -> HSTREAM {
    if !INITIALIZED.load(Ordering::SeqCst) {
        set_error(AURA_ERROR_INIT);
        return 0;
    }

    let url_str = match CStr::from_ptr(url).to_str() {
        Ok(s) => s,
        Err(_) => {
            set_error(AURA_ERROR_FILEOPEN);
            return 0;
        }
    };

    let mut cfg = match Aes67Url::parse(url_str) {
        Ok(c) => c,
        Err(e) => {
            set_error(e.host_code());
            return 0;
        }
    };

    // Registry defaults for anything the URL left unspecified.
    let settings = config::snapshot();
    if cfg.interface.is_none() {
        cfg.interface = settings.interface;
    }
    if cfg.payload_type == 96 {
        cfg.payload_type = settings.payload_type as u8;
    }
    if cfg.jitter_ms == 10 {
        cfg.jitter_ms = settings.jitter_ms;
    }

    let mut stream = match Aes67Stream::new(cfg.clone()) {
        Ok(s) => Box::new(s),
        Err(_) => {
            set_error(AURA_ERROR_MEM);
            return 0;
        }
    };

    if let Err(e) = stream.start() {
        set_error(e.host_code());
        return 0;
    }

    // Bring the shared clock up with the stream unless something
    // already did.
    if settings.ptp_enabled && !clock::is_running() {
        let iface = cfg.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if let Err(e) = clock::start(settings.clock_mode, settings.ptp_domain as u8, iface) {
            warn!(error = %e, "clock did not start with the stream");
        }
    }

    let Some(funcs) = host_funcs() else {
        set_error(AURA_ERROR_INIT);
        return 0;
    };
    let Some(create_stream) = funcs.create_stream else {
        set_error(AURA_ERROR_INIT);
        return 0;
    };

    let mut stream_flags =
        flags & (AURA_SAMPLE_LOOP | AURA_STREAM_DECODE | AURA_STREAM_AUTOFREE);
    if cfg.bits == 24 {
        stream_flags |= AURA_SAMPLE_24BITS;
    }
    stream.stream_flags = stream_flags;

    let stream_ptr = Box::into_raw(stream);
    let handle = create_stream(
        cfg.sample_rate,
        cfg.channels as DWORD,
        stream_flags,
        stream_proc,
        stream_ptr as *mut c_void,
        &ADDON_FUNCS as *const _,
    );

    if handle == 0 {
        // create_stream set the error code
        drop(Box::from_raw(stream_ptr));
        return 0;
    }

    (*stream_ptr).set_handle(handle);
    register_stream(handle, stream_ptr);
    set_error(AURA_OK);
    handle
}

/// Plugin entry: the host asks for one face at a time.
#[no_mangle]
pub unsafe extern "system" fn AURAplugin(face: DWORD) -> *const c_void {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return ptr::null();
    }
    match face {
        AURAPLUGIN_INFO => &PLUGIN_INFO as *const _ as *const c_void,
        AURAPLUGIN_CREATE => ptr::null(), // no file streams, URL only
        AURAPLUGIN_CREATEURL => stream_create_url as *const c_void,
        _ => ptr::null(),
    }
}

/// Plugin load: validate the host ABI, keep its function table, hook
/// the config registry in.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_PluginInit(
    funcs: *const HostFunctions,
    host_version: DWORD,
) -> BOOL {
    if !store_host(funcs, host_version) {
        return FALSE;
    }
    if let Some(f) = host_funcs() {
        if let Some(register) = f.register_plugin {
            register(config_handler as *const c_void, PLUGIN_CONFIG_ADD);
        }
    }
    INITIALIZED.store(true, Ordering::SeqCst);
    TRUE
}

/// Plugin unload: stop the clock, unhook the config registry.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_PluginFree() {
    let _ = clock::stop();
    if let Some(f) = host_funcs() {
        if let Some(register) = f.register_plugin {
            register(config_handler as *const c_void, PLUGIN_CONFIG_REMOVE);
        }
    }
    INITIALIZED.store(false, Ordering::SeqCst);
}

// ============================================================================
// Clock FFI (for output-only deployments with no RX stream)
// ============================================================================

/// Start the shared clock with the configured mode/domain/interface.
/// Returns 1 on success.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_ClockStart() -> i32 {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return 0;
    }
    let settings = config::snapshot();
    let iface = settings.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    match clock::start(settings.clock_mode, settings.ptp_domain as u8, iface) {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.host_code());
            0
        }
    }
}

/// Stop the shared clock. Returns 1 on success.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_ClockStop() -> i32 {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return 0;
    }
    match clock::stop() {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.host_code());
            0
        }
    }
}

/// 1 when the active source reports stable lock.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_ClockIsLocked() -> i32 {
    if !INITIALIZED.load(Ordering::SeqCst) {
        return 0;
    }
    clock::is_locked() as i32
}

/// Clock status line; pointer valid until the next call.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_GetClockStats() -> *const i8 {
    static mut CLOCK_STATS_BUFFER: [u8; 256] = [0; 256];

    if !INITIALIZED.load(Ordering::SeqCst) {
        return b"Not initialized\0".as_ptr() as *const i8;
    }
    let stats = clock::stats_string();
    let bytes = stats.as_bytes();
    let len = bytes.len().min(255);
    let dst = ptr::addr_of_mut!(CLOCK_STATS_BUFFER) as *mut u8;
    ptr::copy_nonoverlapping(bytes.as_ptr(), dst, len);
    *dst.add(len) = 0;
    dst as *const i8
}

// ============================================================================
// Output FFI
// ============================================================================

/// Packed output configuration. Byte layout is part of the ABI so
/// foreign-language bindings can match it.
#[repr(C)]
pub struct Aes67OutputConfigFFI {
    /// Multicast IP as 4 bytes (a.b.c.d)
    pub multicast_addr: [u8; 4],
    pub port: u16,
    /// Interface IP as 4 bytes (0.0.0.0 for default)
    pub interface_addr: [u8; 4],
    pub payload_type: u8,
    pub channels: u16,
    pub sample_rate: u32,
    pub packet_time_us: u32,
}

/// Output statistics, ABI mirror of [`OutputStats`].
#[repr(C)]
pub struct OutputStatsFFI {
    pub packets_sent: u64,
    pub samples_sent: u64,
    pub send_errors: u64,
    pub underruns: u64,
    pub skips: u64,
}

/// Sample source pulling from a host channel through the host table.
struct HostChannelSource {
    channel: DWORD,
    sample_rate: u32,
    channels: u16,
}

impl HostChannelSource {
    /// Query the channel's format so the output config can be checked
    /// against it.
    fn new(channel: DWORD) -> Result<Self, Aes67Error> {
        let funcs = host_funcs().ok_or(Aes67Error::Version)?;
        let get_info = funcs
            .channel_get_info
            .ok_or_else(|| Aes67Error::Unknown("host lacks channel info".into()))?;

        let mut info = AuraChannelInfo {
            freq: 0,
            chans: 0,
            flags: 0,
            ctype: 0,
            origres: 0,
            plugin: 0,
            sample: 0,
            filename: ptr::null(),
        };
        if unsafe { get_info(channel, &mut info) } == FALSE {
            return Err(Aes67Error::ill_param("invalid source channel"));
        }
        Ok(Self {
            channel,
            sample_rate: info.freq,
            channels: info.chans as u16,
        })
    }
}

impl SampleSource for HostChannelSource {
    fn pull(&mut self, dst: &mut [u8]) -> usize {
        let Some(get_data) = host_funcs().and_then(|f| f.channel_get_data) else {
            return 0;
        };
        let n = unsafe {
            get_data(
                self.channel,
                dst.as_mut_ptr() as *mut c_void,
                dst.len() as DWORD,
            )
        };
        if n == DWORD::MAX {
            0 // channel error or ended
        } else {
            (n as usize).min(dst.len())
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// Create an AES67 output pulling from `channel`. Returns an opaque
/// handle, or null with the error code set.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputCreate(
    channel: DWORD,
    config: *const Aes67OutputConfigFFI,
) -> *mut c_void {
    if !INITIALIZED.load(Ordering::SeqCst) || config.is_null() {
        set_error(AURA_ERROR_INIT);
        return ptr::null_mut();
    }
    let cfg = &*config;

    let rust_config = Aes67OutputConfig {
        multicast_addr: Ipv4Addr::from(cfg.multicast_addr),
        port: cfg.port,
        interface: if cfg.interface_addr == [0, 0, 0, 0] {
            None
        } else {
            Some(Ipv4Addr::from(cfg.interface_addr))
        },
        payload_type: cfg.payload_type,
        channels: cfg.channels,
        sample_rate: cfg.sample_rate,
        packet_time_us: cfg.packet_time_us,
        bits: 24, // the wire format of FFI-created outputs is L24
    };

    let source = match HostChannelSource::new(channel) {
        Ok(s) => Box::new(s),
        Err(e) => {
            set_error(e.host_code());
            return ptr::null_mut();
        }
    };

    match Aes67OutputStream::new(source, rust_config) {
        Ok(stream) => {
            set_error(AURA_OK);
            Box::into_raw(Box::new(stream)) as *mut c_void
        }
        Err(e) => {
            set_error(e.host_code());
            ptr::null_mut()
        }
    }
}

/// Begin transmitting. Returns 1 on success.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputStart(handle: *mut c_void) -> i32 {
    if handle.is_null() {
        return 0;
    }
    let stream = &mut *(handle as *mut Aes67OutputStream);
    match stream.start() {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.host_code());
            0
        }
    }
}

/// Stop transmitting; the output can be started again.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputStop(handle: *mut c_void) -> i32 {
    if handle.is_null() {
        return 0;
    }
    let stream = &mut *(handle as *mut Aes67OutputStream);
    stream.stop();
    1
}

/// Copy the transmit counters out (lock-free).
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputGetStats(
    handle: *mut c_void,
    stats: *mut OutputStatsFFI,
) -> i32 {
    if handle.is_null() || stats.is_null() {
        return 0;
    }
    let stream = &*(handle as *mut Aes67OutputStream);
    let s = stream.stats();
    (*stats).packets_sent = s.packets_sent;
    (*stats).samples_sent = s.samples_sent;
    (*stats).send_errors = s.send_errors;
    (*stats).underruns = s.underruns;
    (*stats).skips = s.skips;
    1
}

/// 1 while the transmitter is running.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputIsRunning(handle: *mut c_void) -> i32 {
    if handle.is_null() {
        return 0;
    }
    let stream = &*(handle as *mut Aes67OutputStream);
    stream.is_running() as i32
}

/// Applied clock correction, ppm x 1000 (signed).
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputGetPPM(handle: *mut c_void) -> i32 {
    if handle.is_null() {
        return 0;
    }
    let stream = &*(handle as *mut Aes67OutputStream);
    stream.applied_ppm_x1000()
}

/// Stop and release the output.
#[no_mangle]
pub unsafe extern "system" fn AURA_AES67_OutputFree(handle: *mut c_void) -> i32 {
    if handle.is_null() {
        return 0;
    }
    drop(Box::from_raw(handle as *mut Aes67OutputStream));
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::*;

    #[test]
    fn config_handler_round_trips_plain_keys() {
        let _guard = config::TEST_LOCK.lock();
        unsafe {
            let mut value: DWORD = 98;
            assert_eq!(
                config_handler(
                    AURA_CONFIG_AES67_PT,
                    AURACONFIG_SET,
                    &mut value as *mut _ as *mut c_void
                ),
                TRUE
            );
            let mut read: DWORD = 0;
            assert_eq!(
                config_handler(AURA_CONFIG_AES67_PT, 0, &mut read as *mut _ as *mut c_void),
                TRUE
            );
            assert_eq!(read, 98);

            // Restore the default.
            let mut value: DWORD = 96;
            config_handler(
                AURA_CONFIG_AES67_PT,
                AURACONFIG_SET,
                &mut value as *mut _ as *mut c_void,
            );
        }
    }

    #[test]
    fn config_handler_rejects_bad_values_and_unknown_keys() {
        unsafe {
            let mut value: DWORD = 3; // not a clock mode
            assert_eq!(
                config_handler(
                    AURA_CONFIG_AES67_CLOCK_MODE,
                    AURACONFIG_SET,
                    &mut value as *mut _ as *mut c_void
                ),
                FALSE
            );
            assert_eq!(last_error(), AURA_ERROR_ILLPARAM);

            let mut value: DWORD = 0;
            assert_eq!(
                config_handler(0x30000, 0, &mut value as *mut _ as *mut c_void),
                FALSE
            );
        }
    }

    #[test]
    fn read_only_keys_cannot_be_set() {
        unsafe {
            let mut value: DWORD = 1;
            assert_eq!(
                config_handler(
                    AURA_CONFIG_AES67_BUFFER_LEVEL,
                    AURACONFIG_SET,
                    &mut value as *mut _ as *mut c_void
                ),
                FALSE
            );
        }
    }

    #[test]
    fn stats_keys_answer_without_streams() {
        unsafe {
            let mut level: DWORD = 0;
            assert_eq!(
                config_handler(
                    AURA_CONFIG_AES67_BUFFER_LEVEL,
                    0,
                    &mut level as *mut _ as *mut c_void
                ),
                TRUE
            );
            assert_eq!(level, 100);

            let mut received: u64 = 9;
            assert_eq!(
                config_handler(
                    AURA_CONFIG_AES67_PACKETS_RECEIVED,
                    0,
                    &mut received as *mut _ as *mut c_void
                ),
                TRUE
            );
            assert_eq!(received, 0);
        }
    }
}
