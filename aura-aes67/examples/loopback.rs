//! AES67 loopback demo without a host engine: a sine generator feeds a
//! TX output, an RX stream receives it on the same machine and pulls
//! through the playout cursor, printing stats once a second.
//!
//! Run with: cargo run --example loopback

use std::f64::consts::TAU;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use aura_aes67::clock;
use aura_aes67::input::{Aes67Stream, Aes67Url};
use aura_aes67::output::{Aes67OutputConfig, Aes67OutputStream, SampleSource};
use aura_aes67::ClockMode;

const GROUP: Ipv4Addr = Ipv4Addr::new(239, 192, 76, 52);
const PORT: u16 = 5004;
const IFACE: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const RATE: u32 = 48000;

/// 440 Hz stereo sine in 24-bit host-order PCM.
struct SineSource {
    phase: f64,
}

impl SampleSource for SineSource {
    fn pull(&mut self, dst: &mut [u8]) -> usize {
        for frame in dst.chunks_exact_mut(6) {
            let v = (self.phase.sin() * 0.5 * 8_388_607.0) as i32;
            let bytes = v.to_le_bytes();
            for ch in 0..2 {
                frame[ch * 3..ch * 3 + 3].copy_from_slice(&bytes[..3]);
            }
            self.phase += TAU * 440.0 / RATE as f64;
        }
        dst.len()
    }
    fn sample_rate(&self) -> u32 {
        RATE
    }
    fn channels(&self) -> u16 {
        2
    }
}

fn main() {
    clock::start(ClockMode::System, 0, IFACE).expect("clock");

    let config = Aes67OutputConfig {
        multicast_addr: GROUP,
        port: PORT,
        interface: Some(IFACE),
        ..Default::default()
    };
    let mut output =
        Aes67OutputStream::new(Box::new(SineSource { phase: 0.0 }), config).expect("output");

    let url = format!("aes67://{GROUP}:{PORT}?iface={IFACE}&jitter=10");
    let mut rx = Aes67Stream::new(Aes67Url::parse(&url).expect("url")).expect("stream");
    rx.start().expect("rx start");
    output.start().expect("tx start");

    println!("looping {GROUP}:{PORT} on {IFACE} for 5 seconds...");

    let start = Instant::now();
    let mut pull = vec![0u8; 48 * 6]; // 1 ms stereo L24
    let mut next_report = Instant::now() + Duration::from_secs(1);
    while start.elapsed() < Duration::from_secs(5) {
        rx.read_pcm(&mut pull, clock::now_ns());
        std::thread::sleep(Duration::from_millis(1));

        if Instant::now() >= next_report {
            next_report += Duration::from_secs(1);
            let tx = output.stats();
            println!(
                "tx: {} pkts, {} err | rx: {} pkts, {} late, {} underruns, fill {}%, ptime {} us",
                tx.packets_sent,
                tx.send_errors,
                rx.packets_received(),
                rx.packets_late(),
                rx.jitter_underruns(),
                rx.buffer_fill_percent(),
                rx.detected_packet_time_us(),
            );
        }
    }

    output.stop();
    rx.stop();
    let _ = clock::stop();
}
