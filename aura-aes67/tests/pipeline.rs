//! Software loopback: the TX packetizer feeding the RX depacketizer
//! and jitter buffer directly, no network in between. Deterministic
//! counterpart to the multicast loopback test.

use aura_aes67::input::jitter::JitterBuffer;
use aura_aes67::input::rtp::{wire_to_host, RtpPacket};
use aura_aes67::output::rtp::RtpPacketBuilder;

const RATE: u32 = 48000;
const CHANNELS: usize = 2;
const BITS: u16 = 24;
const BPF: usize = CHANNELS * BITS as usize / 8;
const FRAMES_PER_PACKET: usize = 48; // 1 ms at 48 kHz

/// Deterministic non-zero byte pattern so silence is distinguishable.
fn pattern_bytes(start: usize, len: usize) -> Vec<u8> {
    (start..start + len).map(|i| (i % 251) as u8 + 1).collect()
}

fn build_packets(count: usize) -> (Vec<Vec<u8>>, Vec<u8>) {
    let mut builder = RtpPacketBuilder::new(0xA0B1C2D3, 96);
    let mut packets = Vec::new();
    let mut all_pcm = Vec::new();
    for p in 0..count {
        let pcm = pattern_bytes(p * FRAMES_PER_PACKET * BPF, FRAMES_PER_PACKET * BPF);
        packets.push(
            builder
                .build_packet(&pcm, FRAMES_PER_PACKET as u32, BITS)
                .to_vec(),
        );
        all_pcm.extend_from_slice(&pcm);
    }
    (packets, all_pcm)
}

fn push_wire_packet(jb: &mut JitterBuffer, wire: &[u8]) -> u32 {
    let packet = RtpPacket::parse(wire).expect("valid RTP");
    assert_eq!(packet.header.version, 2);
    assert_eq!(packet.header.payload_type, 96);
    assert_eq!(packet.header.ssrc, 0xA0B1C2D3);
    let pcm = wire_to_host(packet.payload, BITS);
    jb.push(packet.header.timestamp, pcm);
    packet.header.timestamp
}

#[test]
fn in_order_bytes_survive_the_round_trip() {
    let (packets, all_pcm) = build_packets(50);
    let mut jb = JitterBuffer::new(10, RATE, BPF, 1000);

    let mut timestamps = Vec::new();
    for wire in &packets {
        timestamps.push(push_wire_packet(&mut jb, wire));
    }
    // RTP timestamps advance by the frames per packet.
    for pair in timestamps.windows(2) {
        assert_eq!(pair[1].wrapping_sub(pair[0]), FRAMES_PER_PACKET as u32);
    }
    // ...but the cap holds only the newest 4x target.
    assert_eq!(jb.level(), 40);

    // Drain the buffered window and compare byte-for-byte.
    let head = jb.head_ts().unwrap();
    let buffered_packets = jb.level();
    let mut out = vec![0u8; buffered_packets * FRAMES_PER_PACKET * BPF];
    let report = jb.drain(head, &mut out);
    assert_eq!(report.silent_frames, 0);

    let skip = (50 - buffered_packets) * FRAMES_PER_PACKET * BPF;
    assert_eq!(&out[..], &all_pcm[skip..]);
}

#[test]
fn reordered_packets_come_out_in_timestamp_order() {
    let (packets, all_pcm) = build_packets(20);
    let mut jb = JitterBuffer::new(10, RATE, BPF, 1000);

    // Swap every pair: 1,0,3,2,...
    for pair in packets.chunks(2) {
        if pair.len() == 2 {
            push_wire_packet(&mut jb, &pair[1]);
            push_wire_packet(&mut jb, &pair[0]);
        } else {
            push_wire_packet(&mut jb, &pair[0]);
        }
    }
    assert_eq!(jb.level(), 20);

    let mut out = vec![0u8; 20 * FRAMES_PER_PACKET * BPF];
    let report = jb.drain(0, &mut out);
    assert_eq!(report.silent_frames, 0);
    assert_eq!(report.gaps, 0);
    assert_eq!(&out[..], &all_pcm[..]);
}

#[test]
fn lost_packet_becomes_exactly_one_packet_of_silence() {
    let (packets, all_pcm) = build_packets(20);
    let mut jb = JitterBuffer::new(10, RATE, BPF, 1000);

    for (i, wire) in packets.iter().enumerate() {
        if i != 10 {
            push_wire_packet(&mut jb, wire);
        }
    }

    let mut out = vec![0u8; 20 * FRAMES_PER_PACKET * BPF];
    let report = jb.drain(0, &mut out);
    assert_eq!(report.silent_frames, FRAMES_PER_PACKET);
    assert_eq!(report.gaps, 1);

    let packet_bytes = FRAMES_PER_PACKET * BPF;
    let hole = 10 * packet_bytes..11 * packet_bytes;
    assert!(out[hole.clone()].iter().all(|&b| b == 0));
    assert_eq!(&out[..hole.start], &all_pcm[..hole.start]);
    assert_eq!(&out[hole.end..], &all_pcm[hole.end..]);
}
