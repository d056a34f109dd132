//! AES67 input stream.
//!
//! A receiver thread owns the multicast socket and feeds the jitter
//! buffer; the host's audio thread drains it through `stream_proc`. The
//! two sides share only the buffer mutex and atomic counters, so the
//! pull path never waits on network I/O.

use std::ffi::c_void;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use super::jitter::{JitterBuffer, PushResult};
use super::rtp::{self, RtpPacket};
use super::url::Aes67Url;
use crate::clock;
use crate::error::Aes67Error;
use crate::host::*;

/// Packet times AES67 endpoints are expected to interoperate on.
pub const STANDARD_PACKET_TIMES_US: [u32; 5] = [125, 250, 333, 1000, 5000];

/// Consecutive agreeing measurements before the cached packet time is
/// re-classified, so rounding cannot oscillate between 250 and 333.
const PACKET_TIME_HYSTERESIS: u32 = 10;

/// Stream lifecycle states.
pub const STREAM_CREATED: u8 = 0;
pub const STREAM_RUNNING: u8 = 1;
pub const STREAM_STOPPED: u8 = 2;

/// One sync installed by the host on this stream.
pub struct SyncEntry {
    pub handle: HSYNC,
    pub sync_type: DWORD,
    pub param: QWORD,
}

/// Counters shared between the receiver thread, the pull path and the
/// config registry. All lock-free.
#[derive(Default)]
pub struct RxStats {
    pub packets_received: AtomicU64,
    pub packets_late: AtomicU64,
    pub underruns: AtomicU64,
    pub overflows: AtomicU64,
    pub delivered_bytes: AtomicU64,
    pub packet_time_us: AtomicU32,
}

/// State shared with the receiver thread.
struct RxShared {
    buffer: Mutex<JitterBuffer>,
    stats: RxStats,
    syncs: Mutex<Vec<SyncEntry>>,
    /// Host stream handle, set once the host stream exists.
    handle: AtomicU32,
    running: AtomicBool,
    state: AtomicU8,
}

impl RxShared {
    /// Fire every installed sync of one type.
    fn fire_syncs(&self, sync_type: DWORD, data: DWORD) {
        let channel = self.handle.load(Ordering::Relaxed);
        if channel == 0 {
            return;
        }
        let handles: Vec<HSYNC> = self
            .syncs
            .lock()
            .iter()
            .filter(|s| s.sync_type == sync_type)
            .map(|s| s.handle)
            .collect();
        let pos = self.stats.delivered_bytes.load(Ordering::Relaxed);
        trigger_syncs(channel, sync_type, &handles, pos, data);
    }
}

/// AES67 input stream record.
pub struct Aes67Stream {
    config: Aes67Url,
    shared: Arc<RxShared>,
    receiver: Option<JoinHandle<()>>,
    pub stream_flags: DWORD,
    // Playout cursor, touched only from the host pull context.
    anchor: Option<(u32, u64)>,
    last_playout_ts: u32,
    buffering: bool,
    empty_since_ns: Option<u64>,
    underrun_fired: bool,
}

impl Aes67Stream {
    pub fn new(config: Aes67Url) -> Result<Self, Aes67Error> {
        let buffer = JitterBuffer::new(
            config.jitter_ms,
            config.sample_rate,
            config.bytes_per_frame(),
            1000, // assume 1 ms until detected from the wire
        );

        Ok(Self {
            config,
            shared: Arc::new(RxShared {
                buffer: Mutex::new(buffer),
                stats: RxStats::default(),
                syncs: Mutex::new(Vec::new()),
                handle: AtomicU32::new(0),
                running: AtomicBool::new(false),
                state: AtomicU8::new(STREAM_CREATED),
            }),
            receiver: None,
            stream_flags: 0,
            anchor: None,
            last_playout_ts: 0,
            buffering: true,
            empty_since_ns: None,
            underrun_fired: false,
        })
    }

    /// Bind the socket, join the group and start the receiver thread.
    pub fn start(&mut self) -> Result<(), Aes67Error> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(Aes67Error::Already);
        }

        let socket = self.multicast_socket()?;
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let config = self.config.clone();
        self.receiver = Some(
            thread::Builder::new()
                .name("aes67-rx".into())
                .spawn(move || receiver_loop(socket, shared, config))
                .map_err(|e| Aes67Error::Init(e.to_string()))?,
        );
        Ok(())
    }

    fn multicast_socket(&self) -> Result<UdpSocket, Aes67Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port).into())?;
        let interface = self.config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&self.config.multicast_addr, &interface)?;
        // Read timeout so stop() is observed within one cycle.
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        Ok(socket.into())
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.receiver.take() {
            let _ = t.join();
        }
        self.shared.state.store(STREAM_STOPPED, Ordering::Relaxed);
    }

    pub fn set_handle(&self, handle: HSTREAM) {
        self.shared.handle.store(handle, Ordering::Relaxed);
    }

    pub fn handle(&self) -> HSTREAM {
        self.shared.handle.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &Aes67Url {
        &self.config
    }

    /// Install a sync of one of the add-on's own types.
    pub fn add_sync(&self, handle: HSYNC, sync_type: DWORD, param: QWORD) {
        self.shared.syncs.lock().push(SyncEntry {
            handle,
            sync_type,
            param,
        });
    }

    pub fn remove_sync(&self, handle: HSYNC) {
        self.shared.syncs.lock().retain(|s| s.handle != handle);
    }

    /// Fill `dst` with interleaved PCM at the stream's declared format.
    /// `now_ns` is the disciplined clock driving the playout cursor.
    pub fn read_pcm(&mut self, dst: &mut [u8], now_ns: u64) -> usize {
        let _ = self.shared.state.compare_exchange(
            STREAM_CREATED,
            STREAM_RUNNING,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        let bpf = self.config.bytes_per_frame();
        let frames = dst.len() / bpf;
        let mut buffer = self.shared.buffer.lock();

        if self.buffering {
            if buffer.level() >= buffer.target_packets() {
                // Initial fill reached: anchor the cursor to the head.
                let head = buffer.head_ts().unwrap_or(0);
                self.buffering = false;
                self.anchor = Some((head, now_ns));
                self.last_playout_ts = head;
                self.empty_since_ns = None;
                self.underrun_fired = false;
            } else {
                let empty = buffer.is_empty();
                drop(buffer);
                dst.fill(0);
                if empty {
                    self.note_empty(now_ns);
                } else {
                    self.empty_since_ns = None;
                }
                self.shared
                    .stats
                    .delivered_bytes
                    .fetch_add(dst.len() as u64, Ordering::Relaxed);
                return dst.len();
            }
        }

        let (anchor_ts, anchor_ns) = self.anchor.unwrap_or((self.last_playout_ts, now_ns));
        let elapsed = now_ns.saturating_sub(anchor_ns);
        let advance =
            ((elapsed as u128 * self.config.sample_rate as u128 + 500_000_000) / 1_000_000_000)
                as u64;
        let clock_ts = anchor_ts.wrapping_add(advance as u32);

        // The clock cursor must not step back over delivered samples.
        let playout_ts = if rtp::timestamp_delta(self.last_playout_ts, clock_ts) > 0 {
            clock_ts
        } else {
            self.last_playout_ts
        };

        let report = buffer.drain(playout_ts, dst);
        self.last_playout_ts = playout_ts.wrapping_add(frames as u32);

        if report.gaps > 0 {
            self.shared
                .stats
                .underruns
                .fetch_add(report.gaps as u64, Ordering::Relaxed);
        }
        drop(buffer);
        if report.drained_empty {
            // Ran dry: rebuild the fill before playing on.
            self.buffering = true;
            self.anchor = None;
            self.note_empty(now_ns);
        }

        self.shared
            .stats
            .delivered_bytes
            .fetch_add(dst.len() as u64, Ordering::Relaxed);
        dst.len()
    }

    /// Track how long the buffer has been empty; fire the UNDERRUN
    /// syncs once when it exceeds twice the configured depth.
    fn note_empty(&mut self, now_ns: u64) {
        let since = *self.empty_since_ns.get_or_insert(now_ns);
        let limit = self.config.jitter_ms as u64 * 2 * 1_000_000;
        if !self.underrun_fired && now_ns.saturating_sub(since) > limit {
            self.underrun_fired = true;
            self.shared.fire_syncs(AURA_SYNC_AES67_UNDERRUN, 0);
        }
    }

    // Stats accessors for the config registry.

    pub fn buffer_fill_percent(&self) -> u32 {
        self.shared.buffer.lock().fill_percent()
    }

    pub fn buffer_packets(&self) -> usize {
        self.shared.buffer.lock().level()
    }

    pub fn target_packets(&self) -> usize {
        self.shared.buffer.lock().target_packets()
    }

    pub fn jitter_underruns(&self) -> u64 {
        self.shared.stats.underruns.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.shared.stats.packets_received.load(Ordering::Relaxed)
    }

    pub fn packets_late(&self) -> u64 {
        self.shared.stats.packets_late.load(Ordering::Relaxed)
    }

    pub fn detected_packet_time_us(&self) -> u32 {
        self.shared.stats.packet_time_us.load(Ordering::Relaxed)
    }

    pub fn delivered_bytes(&self) -> u64 {
        self.shared.stats.delivered_bytes.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> u8 {
        self.shared.state.load(Ordering::Relaxed)
    }
}

impl Drop for Aes67Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Round a measured packet time onto the nearest standard value.
fn classify_packet_time(ts_delta_frames: u32, rate: u32) -> u32 {
    let measured_us = (ts_delta_frames as u64 * 1_000_000 / rate as u64) as i64;
    *STANDARD_PACKET_TIMES_US
        .iter()
        .min_by_key(|&&std_us| (std_us as i64 - measured_us).abs())
        .unwrap_or(&1000)
}

/// Derive the wire sample width from the first payload: the width whose
/// frame count lands on a standard packet time wins; ambiguity keeps
/// the declared width.
fn detect_bits(payload_len: usize, channels: u16, rate: u32, declared: u16) -> u16 {
    let fits = |bits: u16| -> bool {
        let bpf = channels as usize * bits as usize / 8;
        if bpf == 0 || payload_len % bpf != 0 {
            return false;
        }
        let frames = (payload_len / bpf) as u64;
        let measured_us = frames * 1_000_000 / rate as u64;
        STANDARD_PACKET_TIMES_US.iter().any(|&std_us| {
            let std_us = std_us as u64;
            // within 10% of a standard packet time
            measured_us * 10 >= std_us * 9 && measured_us * 10 <= std_us * 11
        })
    };

    let declared_fits = fits(declared);
    let other = if declared == 24 { 16 } else { 24 };
    if declared_fits || !fits(other) {
        declared
    } else {
        other
    }
}

/// Tracks packet-time measurements with re-classification hysteresis.
struct PacketTimeDetector {
    current_us: u32,
    candidate_us: u32,
    agree_count: u32,
}

impl PacketTimeDetector {
    fn new() -> Self {
        Self {
            current_us: 0,
            candidate_us: 0,
            agree_count: 0,
        }
    }

    /// Feed one classified measurement; returns the new packet time if
    /// it (re-)latched.
    fn observe(&mut self, classified_us: u32) -> Option<u32> {
        if self.current_us == 0 {
            self.current_us = classified_us;
            return Some(classified_us);
        }
        if classified_us == self.current_us {
            self.candidate_us = 0;
            self.agree_count = 0;
            return None;
        }
        if classified_us == self.candidate_us {
            self.agree_count += 1;
            if self.agree_count >= PACKET_TIME_HYSTERESIS {
                self.current_us = classified_us;
                self.candidate_us = 0;
                self.agree_count = 0;
                return Some(classified_us);
            }
        } else {
            self.candidate_us = classified_us;
            self.agree_count = 1;
        }
        None
    }
}

/// Receiver thread: parse, validate, order, buffer.
fn receiver_loop(socket: UdpSocket, shared: Arc<RxShared>, config: Aes67Url) {
    let mut buf = [0u8; 2048];
    let mut latched_ssrc: Option<u32> = None;
    let mut wire_bits = config.bits;
    let mut last_seq: Option<u16> = None;
    let mut last_ts: Option<u32> = None;
    let mut detector = PacketTimeDetector::new();

    while shared.running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(error = %e, "aes67 receive socket failed");
                break;
            }
        };

        let Some(packet) = RtpPacket::parse(&buf[..len]) else {
            continue;
        };
        if packet.header.payload_type != config.payload_type {
            continue;
        }

        // SSRC is latched from the first accepted packet and sticky.
        match latched_ssrc {
            None => {
                latched_ssrc = Some(packet.header.ssrc);
                wire_bits = detect_bits(
                    packet.payload.len(),
                    config.channels,
                    config.sample_rate,
                    config.bits,
                );
                if wire_bits != config.bits {
                    warn!(
                        declared = config.bits,
                        detected = wire_bits,
                        "wire sample width differs from declared, converting"
                    );
                }
            }
            Some(ssrc) if ssrc != packet.header.ssrc => {
                shared.stats.packets_late.fetch_add(1, Ordering::Relaxed);
                shared.fire_syncs(AURA_SYNC_AES67_PACKET_LATE, packet.header.ssrc);
                continue;
            }
            _ => {}
        }

        shared.stats.packets_received.fetch_add(1, Ordering::Relaxed);

        let seq = packet.header.sequence;
        let ts = packet.header.timestamp;
        let mut in_order = false;
        match last_seq {
            None => {
                last_seq = Some(seq);
                in_order = true;
            }
            Some(prev) => {
                let delta = rtp::sequence_delta(prev, seq);
                if delta == 1 {
                    last_seq = Some(seq);
                    in_order = true;
                } else if delta > 1 {
                    // Gap: missing packets turn into silence at pull
                    // time, the expected sequence moves on.
                    debug!(missing = delta - 1, "sequence gap");
                    last_seq = Some(seq);
                } else {
                    // Old sequence: either still inside the window
                    // (reorder) or behind the head (too late).
                    if shared.buffer.lock().is_before_head(ts) {
                        shared.stats.packets_late.fetch_add(1, Ordering::Relaxed);
                        shared.fire_syncs(AURA_SYNC_AES67_PACKET_LATE, seq as DWORD);
                        continue;
                    }
                }
            }
        }

        // Packet time from in-order timestamp spacing.
        if in_order {
            if let Some(prev_ts) = last_ts {
                let delta = rtp::timestamp_delta(prev_ts, ts);
                if delta > 0 {
                    let classified = classify_packet_time(delta as u32, config.sample_rate);
                    if let Some(pt_us) = detector.observe(classified) {
                        shared.stats.packet_time_us.store(pt_us, Ordering::Relaxed);
                        shared
                            .buffer
                            .lock()
                            .retime(config.jitter_ms, config.sample_rate, pt_us);
                        debug!(packet_time_us = pt_us, "packet time latched");
                    }
                }
            }
            last_ts = Some(ts);
        }

        // Wire order to host order, then to the declared width.
        let host_pcm = rtp::wire_to_host(packet.payload, wire_bits);
        let pcm = if wire_bits != config.bits {
            rtp::convert_width(&host_pcm, wire_bits, config.bits)
        } else {
            host_pcm
        };

        match shared.buffer.lock().push(ts, pcm) {
            PushResult::Inserted { dropped_oldest, .. } => {
                if dropped_oldest > 0 {
                    shared
                        .stats
                        .overflows
                        .fetch_add(dropped_oldest as u64, Ordering::Relaxed);
                    shared
                        .stats
                        .underruns
                        .fetch_add(dropped_oldest as u64, Ordering::Relaxed);
                }
            }
            PushResult::Duplicate => {
                shared.stats.packets_late.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ============================================================================
// Host-facing callbacks
// ============================================================================

/// Stream fill callback handed to the host at stream creation.
pub unsafe extern "system" fn stream_proc(
    _handle: HSTREAM,
    buffer: *mut c_void,
    length: DWORD,
    user: *mut c_void,
) -> DWORD {
    if user.is_null() || buffer.is_null() {
        return 0;
    }
    let stream = &mut *(user as *mut Aes67Stream);
    let dst = std::slice::from_raw_parts_mut(buffer as *mut u8, length as usize);

    // Deliver whole frames only.
    let bpf = stream.config.bytes_per_frame();
    let usable = dst.len() / bpf * bpf;
    let written = stream.read_pcm(&mut dst[..usable], clock::now_ns());
    written as DWORD
}

unsafe extern "system" fn addon_free(inst: *mut c_void) {
    if !inst.is_null() {
        let stream = Box::from_raw(inst as *mut Aes67Stream);
        crate::unregister_stream(stream.handle());
    }
}

/// Only BYTE mode is recognized; it reports delivered bytes so the host
/// can translate positions. A live stream has no length.
unsafe extern "system" fn addon_get_length(inst: *mut c_void, mode: DWORD) -> QWORD {
    if inst.is_null() || mode != AURA_POS_BYTE {
        set_error(AURA_ERROR_NOTAVAIL);
        return QWORD::MAX;
    }
    let stream = &*(inst as *const Aes67Stream);
    set_error(AURA_OK);
    stream.delivered_bytes()
}

unsafe extern "system" fn addon_get_info(inst: *mut c_void, info: *mut AuraChannelInfo) {
    if inst.is_null() || info.is_null() {
        return;
    }
    let stream = &*(inst as *const Aes67Stream);
    let cfg = stream.config();
    (*info).freq = cfg.sample_rate;
    (*info).chans = cfg.channels as DWORD;
    (*info).flags = stream.stream_flags
        | if cfg.bits == 24 {
            AURA_SAMPLE_24BITS
        } else {
            0
        };
    (*info).ctype = AURA_CTYPE_STREAM_AES67;
    (*info).origres = cfg.bits as DWORD;
    (*info).plugin = 0;
    (*info).sample = 0;
    (*info).filename = std::ptr::null();
}

/// Seeking never works on a live stream.
unsafe extern "system" fn addon_can_set_position(
    _inst: *mut c_void,
    _pos: QWORD,
    _mode: DWORD,
) -> BOOL {
    set_error(AURA_ERROR_NOTAVAIL);
    FALSE
}

unsafe extern "system" fn addon_set_position(
    _inst: *mut c_void,
    _pos: QWORD,
    _mode: DWORD,
) -> QWORD {
    set_error(AURA_ERROR_NOTAVAIL);
    QWORD::MAX
}

/// Install UNDERRUN / PACKET_LATE syncs; everything else goes back to
/// the host with the -1 sentinel.
unsafe extern "system" fn addon_set_sync(
    inst: *mut c_void,
    type_: DWORD,
    param: QWORD,
    proc_: SyncProc,
    user: *mut c_void,
) -> HSYNC {
    if inst.is_null() {
        return 0;
    }
    let stream = &*(inst as *const Aes67Stream);

    match type_ & SYNC_TYPE_MASK {
        AURA_SYNC_AES67_UNDERRUN | AURA_SYNC_AES67_PACKET_LATE => {}
        _ => return -1i32 as HSYNC, // host handles POS/END itself
    }

    let sync = new_sync(stream.handle(), type_, proc_, user);
    if sync == 0 {
        return 0; // host set the error code
    }
    stream.add_sync(sync, type_ & SYNC_TYPE_MASK, param);
    set_error(AURA_OK);
    sync
}

unsafe extern "system" fn addon_remove_sync(inst: *mut c_void, sync: HSYNC) {
    if inst.is_null() {
        return;
    }
    let stream = &*(inst as *const Aes67Stream);
    stream.remove_sync(sync);
}

/// Callback table for AES67 streams. Reserved slots stay None.
pub static ADDON_FUNCS: AddonFunctions = AddonFunctions {
    flags: 0,
    free: Some(addon_free),
    get_length: Some(addon_get_length),
    get_tags: None,
    get_file_position: None,
    get_info: Some(addon_get_info),
    can_set_position: Some(addon_can_set_position),
    set_position: Some(addon_set_position),
    get_position: None,
    set_sync: Some(addon_set_sync),
    remove_sync: Some(addon_remove_sync),
    can_resume: None,
    set_flags: None,
    attribute: None,
    attribute_ex: None,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rounds_to_standard_times() {
        assert_eq!(classify_packet_time(48, 48000), 1000);
        assert_eq!(classify_packet_time(12, 48000), 250);
        assert_eq!(classify_packet_time(16, 48000), 333);
        assert_eq!(classify_packet_time(6, 48000), 125);
        assert_eq!(classify_packet_time(240, 48000), 5000);
        assert_eq!(classify_packet_time(48, 44100), 1000);
        assert_eq!(classify_packet_time(96, 96000), 1000);
    }

    #[test]
    fn detector_needs_hysteresis_to_reclassify() {
        let mut d = PacketTimeDetector::new();
        assert_eq!(d.observe(1000), Some(1000));
        assert_eq!(d.observe(1000), None);

        // A lone disagreeing measurement does not re-latch.
        assert_eq!(d.observe(250), None);
        assert_eq!(d.observe(1000), None);

        // Ten in a row do.
        let mut latched = None;
        for _ in 0..PACKET_TIME_HYSTERESIS {
            latched = d.observe(250);
        }
        assert_eq!(latched, Some(250));
    }

    #[test]
    fn bit_depth_detection() {
        // 48 kHz stereo, 1 ms: 288 bytes is unambiguously L24.
        assert_eq!(detect_bits(288, 2, 48000, 24), 24);
        // Even when the URL said 16, 288 bytes only fits L24.
        assert_eq!(detect_bits(288, 2, 48000, 16), 24);
        // 192 bytes at 48 kHz stereo is L16 1 ms.
        assert_eq!(detect_bits(192, 2, 48000, 16), 16);
        // Nothing fits: keep the declared width.
        assert_eq!(detect_bits(7, 2, 48000, 24), 24);
    }

    #[test]
    fn pull_before_fill_is_silence() {
        let url = Aes67Url::parse("aes67://239.192.76.52:6104").unwrap();
        let mut stream = Aes67Stream::new(url).unwrap();
        let mut out = vec![0xFFu8; 288];
        let n = stream.read_pcm(&mut out, 0);
        assert_eq!(n, 288);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(stream.delivered_bytes(), 288);
        assert_eq!(stream.state(), STREAM_RUNNING);
    }
}
