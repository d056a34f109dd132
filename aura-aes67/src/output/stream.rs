//! AES67 output stream.
//!
//! One transmitter thread per output owns the socket and runs the
//! packetizer against absolute deadlines on the shared clock, so the
//! long-term send rate has zero drift. PCM is staged in a fixed ring
//! fed from the host channel; shortfalls are concealed by repeating the
//! last frame.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::rtp::RtpPacketBuilder;
use crate::clock;
use crate::error::Aes67Error;

/// DSCP EF (46) in the TOS byte.
const DSCP_EF_TOS: u32 = 46 << 2;
/// LAN-scope multicast TTL.
const MULTICAST_TTL: u32 = 15;
/// Deadlines lagging by this many packet times force a resync.
const RESYNC_FACTOR: u64 = 10;

pub const OUTPUT_CREATED: u8 = 0;
pub const OUTPUT_RUNNING: u8 = 1;
pub const OUTPUT_STOPPED: u8 = 2;

/// Where the transmitter pulls PCM from. The host-channel adapter and
/// the test/demo generators both implement this.
pub trait SampleSource: Send {
    /// Fill `dst` with host-order PCM at the declared format; returns
    /// the byte count actually written.
    fn pull(&mut self, dst: &mut [u8]) -> usize;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// Output stream configuration.
#[derive(Debug, Clone)]
pub struct Aes67OutputConfig {
    pub multicast_addr: Ipv4Addr,
    pub port: u16,
    /// Source interface, None = kernel default.
    pub interface: Option<Ipv4Addr>,
    pub payload_type: u8,
    pub channels: u16,
    pub sample_rate: u32,
    pub packet_time_us: u32,
    /// Wire sample width, 16 or 24.
    pub bits: u16,
}

impl Default for Aes67OutputConfig {
    fn default() -> Self {
        Self {
            multicast_addr: Ipv4Addr::new(239, 192, 76, 52),
            port: 5004,
            interface: None,
            payload_type: 96,
            channels: 2,
            sample_rate: 48000,
            packet_time_us: 1000,
            bits: 24,
        }
    }
}

#[derive(Default)]
struct TxStats {
    packets_sent: AtomicU64,
    samples_sent: AtomicU64,
    send_errors: AtomicU64,
    underruns: AtomicU64,
    skips: AtomicU64,
}

/// Snapshot of the transmit counters.
#[derive(Debug, Default, Clone)]
pub struct OutputStats {
    pub packets_sent: u64,
    pub samples_sent: u64,
    pub send_errors: u64,
    /// Cycles the host delivered fewer samples than one packet.
    pub underruns: u64,
    /// Deadline resynchronizations after a stall.
    pub skips: u64,
}

/// AES67 output stream record.
pub struct Aes67OutputStream {
    running: Arc<AtomicBool>,
    stats: Arc<TxStats>,
    state: Arc<AtomicU8>,
    source: Arc<Mutex<Option<Box<dyn SampleSource>>>>,
    tx_thread: Option<JoinHandle<()>>,
    config: Aes67OutputConfig,
    samples_per_packet: usize,
    ssrc: u32,
}

impl Aes67OutputStream {
    /// Validate the configuration against the source and build the
    /// record. No socket is bound here.
    pub fn new(
        source: Box<dyn SampleSource>,
        config: Aes67OutputConfig,
    ) -> Result<Self, Aes67Error> {
        if !matches!(config.packet_time_us, 125 | 250 | 333 | 1000 | 5000) {
            return Err(Aes67Error::ill_param(
                "packet time must be 125, 250, 333, 1000 or 5000 us",
            ));
        }
        if !matches!(config.sample_rate, 44100 | 48000 | 96000) {
            return Err(Aes67Error::ill_param(
                "sample rate must be 44100, 48000 or 96000",
            ));
        }
        if config.channels == 0 || config.channels > 8 {
            return Err(Aes67Error::ill_param("channels must be 1-8"));
        }
        if !matches!(config.bits, 16 | 24) {
            return Err(Aes67Error::ill_param("bit depth must be 16 or 24"));
        }
        if !config.multicast_addr.is_multicast() {
            return Err(Aes67Error::ill_param(
                "destination must be a multicast address",
            ));
        }
        if source.sample_rate() != config.sample_rate {
            return Err(Aes67Error::ill_param(
                "source channel rate does not match the output rate",
            ));
        }
        if source.channels() != config.channels {
            return Err(Aes67Error::ill_param(
                "source channel count does not match the output",
            ));
        }

        let samples_per_packet =
            (config.sample_rate as u64 * config.packet_time_us as u64 / 1_000_000) as usize;
        if samples_per_packet == 0 {
            return Err(Aes67Error::ill_param("packet time too short for rate"));
        }

        Ok(Self {
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(TxStats::default()),
            state: Arc::new(AtomicU8::new(OUTPUT_CREATED)),
            source: Arc::new(Mutex::new(Some(source))),
            tx_thread: None,
            config,
            samples_per_packet,
            ssrc: rand::random::<u32>(),
        })
    }

    fn socket(config: &Aes67OutputConfig) -> Result<UdpSocket, Aes67Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        let bind_addr = config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.bind(&SocketAddrV4::new(bind_addr, 0).into())?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        if let Some(iface) = config.interface {
            socket.set_multicast_if_v4(&iface)?;
        }
        // Expedited forwarding; some stacks refuse TOS, keep going.
        if let Err(e) = socket.set_tos(DSCP_EF_TOS) {
            debug!(error = %e, "could not set DSCP EF");
        }
        Ok(socket.into())
    }

    /// Arm the transmitter. Fails with ALREADY when running.
    pub fn start(&mut self) -> Result<(), Aes67Error> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Aes67Error::Already);
        }

        let socket = Self::socket(&self.config)?;
        let dest = SocketAddrV4::new(self.config.multicast_addr, self.config.port);

        self.running.store(true, Ordering::SeqCst);
        self.state.store(OUTPUT_RUNNING, Ordering::Relaxed);

        let running = self.running.clone();
        let stats = self.stats.clone();
        let source = self.source.clone();
        let config = self.config.clone();
        let samples_per_packet = self.samples_per_packet;
        let ssrc = self.ssrc;

        self.tx_thread = Some(
            thread::Builder::new()
                .name("aes67-tx".into())
                .spawn(move || {
                    transmitter_loop(
                        running,
                        stats,
                        source,
                        socket,
                        dest,
                        config,
                        samples_per_packet,
                        ssrc,
                    );
                })
                .map_err(|e| {
                    self.running.store(false, Ordering::SeqCst);
                    self.state.store(OUTPUT_CREATED, Ordering::Relaxed);
                    Aes67Error::Init(e.to_string())
                })?,
        );

        info!(
            dest = %dest,
            packet_time_us = self.config.packet_time_us,
            "aes67 output started"
        );
        Ok(())
    }

    /// Halt the transmitter; it observes the flag within one packet
    /// time.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.tx_thread.take() {
            let _ = t.join();
        }
        if self.state.load(Ordering::Relaxed) == OUTPUT_RUNNING {
            self.state.store(OUTPUT_STOPPED, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> OutputStats {
        OutputStats {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            samples_sent: self.stats.samples_sent.load(Ordering::Relaxed),
            send_errors: self.stats.send_errors.load(Ordering::Relaxed),
            underruns: self.stats.underruns.load(Ordering::Relaxed),
            skips: self.stats.skips.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The shared clock's frequency correction, ppm x 1000, so the far
    /// end can log skew.
    pub fn applied_ppm_x1000(&self) -> i32 {
        clock::ppm_x1000()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn samples_per_packet(&self) -> usize {
        self.samples_per_packet
    }

    pub fn config(&self) -> &Aes67OutputConfig {
        &self.config
    }
}

impl Drop for Aes67OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pad a partially filled packet by repeating the last complete frame.
/// Returns true when padding was needed. `last_frame` is updated from
/// the newest complete frame so concealment holds the final level.
fn pad_with_last_frame(
    pcm: &mut [u8],
    got_bytes: usize,
    bytes_per_frame: usize,
    last_frame: &mut [u8],
) -> bool {
    let whole = got_bytes / bytes_per_frame * bytes_per_frame;
    if whole >= bytes_per_frame {
        last_frame.copy_from_slice(&pcm[whole - bytes_per_frame..whole]);
    }
    if whole == pcm.len() {
        return false;
    }
    for chunk in pcm[whole..].chunks_mut(bytes_per_frame) {
        chunk.copy_from_slice(&last_frame[..chunk.len()]);
    }
    true
}

/// Sleep until the disciplined clock reaches `deadline_ns`: coarse
/// sleep first, spin for the last stretch.
fn sleep_until(deadline_ns: u64) {
    loop {
        let now = clock::now_ns();
        if now >= deadline_ns {
            return;
        }
        let remain = deadline_ns - now;
        if remain > 2_000_000 {
            thread::sleep(Duration::from_nanos(remain - 1_000_000));
        } else {
            std::hint::spin_loop();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn transmitter_loop(
    running: Arc<AtomicBool>,
    stats: Arc<TxStats>,
    source: Arc<Mutex<Option<Box<dyn SampleSource>>>>,
    socket: UdpSocket,
    dest: SocketAddrV4,
    config: Aes67OutputConfig,
    samples_per_packet: usize,
    ssrc: u32,
) {
    // Sub-millisecond deadlines need an elevated priority on Windows.
    #[cfg(windows)]
    unsafe {
        use windows_sys::Win32::System::Threading::{
            GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
        };
        SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL);
    }

    let mut guard = source.lock();
    let Some(src) = guard.as_mut() else {
        return;
    };

    let bytes_per_frame = config.channels as usize * config.bits as usize / 8;
    let packet_bytes = samples_per_packet * bytes_per_frame;
    let interval_ns = config.packet_time_us as u64 * 1_000;

    // Fixed staging ring between the host pull and the packetizer.
    let ring = HeapRb::<u8>::new(packet_bytes * 4);
    let (mut producer, mut consumer) = ring.split();

    let mut rtp = RtpPacketBuilder::new(ssrc, config.payload_type);
    let mut pcm = vec![0u8; packet_bytes];
    let mut pull_buf = vec![0u8; packet_bytes];
    let mut last_frame = vec![0u8; bytes_per_frame];

    let mut deadline = clock::now_ns() + interval_ns;

    while running.load(Ordering::SeqCst) {
        sleep_until(deadline);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        // Top the ring up to one packet.
        let missing = packet_bytes.saturating_sub(consumer.occupied_len());
        if missing > 0 {
            let n = src.pull(&mut pull_buf[..missing]);
            producer.push_slice(&pull_buf[..n]);
        }

        let got = consumer.pop_slice(&mut pcm);
        if pad_with_last_frame(&mut pcm, got, bytes_per_frame, &mut last_frame) {
            stats.underruns.fetch_add(1, Ordering::Relaxed);
        }

        let packet = rtp.build_packet(&pcm, samples_per_packet as u32, config.bits);
        match socket.send_to(packet, dest) {
            Ok(_) => {
                stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                stats
                    .samples_sent
                    .fetch_add(samples_per_packet as u64, Ordering::Relaxed);
            }
            Err(e) => {
                stats.send_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "aes67 send failed");
            }
        }

        // Absolute schedule: advance from the previous deadline so the
        // long-term rate does not drift.
        deadline += interval_ns;
        let now = clock::now_ns();
        if now > deadline + RESYNC_FACTOR * interval_ns {
            warn!(behind_ns = now - deadline, "transmit stalled, resyncing");
            deadline = now + interval_ns;
            stats.skips.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Silence generator at a fixed format.
    struct Silence {
        rate: u32,
        channels: u16,
    }

    impl SampleSource for Silence {
        fn pull(&mut self, dst: &mut [u8]) -> usize {
            dst.fill(0);
            dst.len()
        }
        fn sample_rate(&self) -> u32 {
            self.rate
        }
        fn channels(&self) -> u16 {
            self.channels
        }
    }

    fn source(rate: u32, channels: u16) -> Box<dyn SampleSource> {
        Box::new(Silence { rate, channels })
    }

    #[test]
    fn create_validates_parameters() {
        let ok = Aes67OutputConfig::default();
        assert!(Aes67OutputStream::new(source(48000, 2), ok.clone()).is_ok());

        let mut bad = ok.clone();
        bad.packet_time_us = 500;
        assert!(matches!(
            Aes67OutputStream::new(source(48000, 2), bad),
            Err(Aes67Error::IllParam(_))
        ));

        let mut bad = ok.clone();
        bad.sample_rate = 22050;
        assert!(Aes67OutputStream::new(source(22050, 2), bad).is_err());

        let mut bad = ok.clone();
        bad.multicast_addr = Ipv4Addr::new(10, 1, 2, 3);
        assert!(Aes67OutputStream::new(source(48000, 2), bad).is_err());

        // Source rate mismatch, the host channel is 48 kHz.
        let mut cfg = ok.clone();
        cfg.sample_rate = 44100;
        assert!(matches!(
            Aes67OutputStream::new(source(48000, 2), cfg),
            Err(Aes67Error::IllParam(_))
        ));

        let mut cfg = ok;
        cfg.channels = 4;
        assert!(Aes67OutputStream::new(source(48000, 2), cfg).is_err());
    }

    #[test]
    fn samples_per_packet_follows_packet_time() {
        for (pt, expected) in [(125, 6), (250, 12), (333, 15), (1000, 48), (5000, 240)] {
            let cfg = Aes67OutputConfig {
                packet_time_us: pt,
                ..Default::default()
            };
            let out = Aes67OutputStream::new(source(48000, 2), cfg).unwrap();
            assert_eq!(out.samples_per_packet(), expected, "packet time {pt}");
        }
    }

    #[test]
    fn held_last_concealment() {
        let bpf = 6;
        let mut pcm = vec![0u8; 4 * bpf];
        let mut last = vec![0u8; bpf];

        // Two complete frames delivered: frames 3 and 4 repeat frame 2.
        for (i, b) in pcm[..2 * bpf].iter_mut().enumerate() {
            *b = (i / bpf + 1) as u8;
        }
        let padded = pad_with_last_frame(&mut pcm, 2 * bpf, bpf, &mut last);
        assert!(padded);
        assert_eq!(&pcm[2 * bpf..3 * bpf], &[2u8; 6][..]);
        assert_eq!(&pcm[3 * bpf..], &[2u8; 6][..]);
        assert_eq!(last, vec![2u8; 6]);

        // Full delivery needs no padding.
        let mut pcm = vec![7u8; 4 * bpf];
        assert!(!pad_with_last_frame(&mut pcm, 4 * bpf, bpf, &mut last));
        assert_eq!(last, vec![7u8; 6]);

        // Partial trailing frame is overwritten by concealment.
        let mut pcm = vec![9u8; 4 * bpf];
        pcm[3 * bpf..].fill(0x55);
        assert!(pad_with_last_frame(&mut pcm, 3 * bpf + 2, bpf, &mut last));
        assert_eq!(&pcm[3 * bpf..], &[9u8; 6][..]);
    }
}
