//! Timestamp-keyed jitter buffer.
//!
//! An ordered ring of (rtp_ts, pcm_bytes) entries, ordered by signed
//! 32-bit timestamp distance so sequence wrap is transparent. Insertion
//! reorders late packets into place; the drain side copies whatever
//! overlaps the playout cursor and conceals holes with silence.
//!
//! The buffer knows nothing about wall time or sockets; the stream owns
//! the cursor and hands absolute playout timestamps in.

use std::collections::VecDeque;

use super::rtp::timestamp_delta;

/// One buffered packet, PCM already in host order and stream width.
struct Entry {
    rtp_ts: u32,
    pcm: Vec<u8>,
}

impl Entry {
    /// Frames carried by this entry.
    fn frames(&self, bytes_per_frame: usize) -> u32 {
        (self.pcm.len() / bytes_per_frame) as u32
    }
}

/// Outcome of a push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushResult {
    /// Stored; `dropped_oldest` entries fell off the hard cap.
    Inserted { dropped_oldest: usize, reordered: bool },
    /// Same timestamp already buffered.
    Duplicate,
}

/// Report of one drain call.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Frames zero-filled because no entry covered them.
    pub silent_frames: usize,
    /// Contiguous silence runs while data was still buffered (lost or
    /// not-yet-arrived packets inside the window).
    pub gaps: usize,
    /// The buffer was empty when the drain finished.
    pub drained_empty: bool,
}

pub struct JitterBuffer {
    entries: VecDeque<Entry>,
    bytes_per_frame: usize,
    target_packets: usize,
    max_packets: usize,
}

impl JitterBuffer {
    /// Target and cap follow from the depth in milliseconds and the
    /// packet time; both are re-derived when the packet time is
    /// detected from the wire.
    pub fn new(jitter_ms: u32, rate: u32, bytes_per_frame: usize, packet_time_us: u32) -> Self {
        let mut jb = Self {
            entries: VecDeque::new(),
            bytes_per_frame,
            target_packets: 1,
            max_packets: 4,
        };
        jb.retime(jitter_ms, rate, packet_time_us);
        jb
    }

    /// Recompute target/cap for a (possibly re-detected) packet time.
    pub fn retime(&mut self, jitter_ms: u32, _rate: u32, packet_time_us: u32) {
        let packet_time_us = packet_time_us.max(125);
        let jitter_us = jitter_ms as u64 * 1000;
        let target = jitter_us.div_ceil(packet_time_us as u64) as usize;
        self.target_packets = target.max(1);
        self.max_packets = self.target_packets * 4;
    }

    pub fn target_packets(&self) -> usize {
        self.target_packets
    }

    pub fn level(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the oldest buffered entry.
    pub fn head_ts(&self) -> Option<u32> {
        self.entries.front().map(|e| e.rtp_ts)
    }

    /// Fill percentage relative to target, clamped to 200.
    pub fn fill_percent(&self) -> u32 {
        ((self.entries.len() * 100 / self.target_packets.max(1)) as u32).min(200)
    }

    /// True when `ts` lies strictly before the oldest buffered entry.
    pub fn is_before_head(&self, ts: u32) -> bool {
        match self.head_ts() {
            Some(head) => timestamp_delta(head, ts) < 0,
            None => false,
        }
    }

    /// Insert a packet at its timestamp position.
    pub fn push(&mut self, rtp_ts: u32, pcm: Vec<u8>) -> PushResult {
        let at_tail = self
            .entries
            .back()
            .map(|last| timestamp_delta(last.rtp_ts, rtp_ts) > 0)
            .unwrap_or(true);

        if at_tail {
            self.entries.push_back(Entry { rtp_ts, pcm });
        } else {
            // Binary search on the signed timestamp distance.
            let pos = self
                .entries
                .partition_point(|e| timestamp_delta(e.rtp_ts, rtp_ts) > 0);
            if let Some(e) = self.entries.get(pos) {
                if e.rtp_ts == rtp_ts {
                    return PushResult::Duplicate;
                }
            }
            self.entries.insert(pos, Entry { rtp_ts, pcm });
        }

        let mut dropped_oldest = 0;
        while self.entries.len() > self.max_packets {
            self.entries.pop_front();
            dropped_oldest += 1;
        }

        PushResult::Inserted {
            dropped_oldest,
            reordered: !at_tail,
        }
    }

    /// Copy frames starting at `playout_ts` into `dst`, advancing
    /// through the ring. Frames not covered by any entry come out as
    /// silence. Entries wholly behind the cursor are discarded.
    pub fn drain(&mut self, playout_ts: u32, dst: &mut [u8]) -> DrainReport {
        let bpf = self.bytes_per_frame;
        let frames = dst.len() / bpf;
        let mut report = DrainReport::default();
        let mut in_gap = false;

        for i in 0..frames {
            let ts = playout_ts.wrapping_add(i as u32);

            // Drop entries that end at or before the cursor.
            while let Some(front) = self.entries.front() {
                let end = front.rtp_ts.wrapping_add(front.frames(bpf));
                if timestamp_delta(ts, end) <= 0 {
                    self.entries.pop_front();
                } else {
                    break;
                }
            }

            let out = &mut dst[i * bpf..(i + 1) * bpf];
            let copied = match self.entries.front() {
                Some(front) => {
                    let into_entry = timestamp_delta(front.rtp_ts, ts);
                    if into_entry >= 0 && (into_entry as u32) < front.frames(bpf) {
                        let off = into_entry as usize * bpf;
                        out.copy_from_slice(&front.pcm[off..off + bpf]);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if copied {
                in_gap = false;
            } else {
                out.fill(0);
                report.silent_frames += 1;
                // Only count a gap while later data is still waiting.
                if !self.entries.is_empty() && !in_gap {
                    report.gaps += 1;
                    in_gap = true;
                }
            }
        }

        // Discard entries the cursor has now fully consumed.
        let next_ts = playout_ts.wrapping_add(frames as u32);
        while let Some(front) = self.entries.front() {
            let end = front.rtp_ts.wrapping_add(front.frames(bpf));
            if timestamp_delta(next_ts, end) <= 0 {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        report.drained_empty = self.entries.is_empty();
        report
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPF: usize = 6; // stereo L24

    fn frame_bytes(tag: u8, frames: usize) -> Vec<u8> {
        vec![tag; frames * BPF]
    }

    fn buffer() -> JitterBuffer {
        // 10 ms at 48 kHz with 1 ms packets: target 10, cap 40.
        JitterBuffer::new(10, 48000, BPF, 1000)
    }

    #[test]
    fn target_follows_packet_time() {
        let jb = buffer();
        assert_eq!(jb.target_packets(), 10);

        let mut jb = buffer();
        jb.retime(10, 48000, 250);
        assert_eq!(jb.target_packets(), 40);
        jb.retime(10, 48000, 333);
        assert_eq!(jb.target_packets(), 31); // ceil(10000/333)
    }

    #[test]
    fn in_order_drain_returns_data() {
        let mut jb = buffer();
        jb.push(0, frame_bytes(1, 48));
        jb.push(48, frame_bytes(2, 48));

        let mut out = vec![0xFFu8; 96 * BPF];
        let report = jb.drain(0, &mut out);
        assert_eq!(report.silent_frames, 0);
        assert_eq!(&out[..48 * BPF], &frame_bytes(1, 48)[..]);
        assert_eq!(&out[48 * BPF..], &frame_bytes(2, 48)[..]);
        assert!(report.drained_empty);
    }

    #[test]
    fn reordered_packet_lands_in_place() {
        let mut jb = buffer();
        jb.push(0, frame_bytes(1, 48));
        jb.push(96, frame_bytes(3, 48));
        let result = jb.push(48, frame_bytes(2, 48));
        assert!(matches!(
            result,
            PushResult::Inserted {
                reordered: true,
                ..
            }
        ));

        let mut out = vec![0u8; 144 * BPF];
        let report = jb.drain(0, &mut out);
        assert_eq!(report.silent_frames, 0);
        assert_eq!(&out[48 * BPF..96 * BPF], &frame_bytes(2, 48)[..]);
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut jb = buffer();
        jb.push(0, frame_bytes(1, 48));
        jb.push(48, frame_bytes(2, 48));
        assert_eq!(jb.push(0, frame_bytes(9, 48)), PushResult::Duplicate);
    }

    #[test]
    fn missing_packet_becomes_silence_and_counts_one_gap() {
        let mut jb = buffer();
        jb.push(0, frame_bytes(1, 48));
        // Packet covering 48..96 lost.
        jb.push(96, frame_bytes(3, 48));

        let mut out = vec![0xFFu8; 144 * BPF];
        let report = jb.drain(0, &mut out);
        assert_eq!(report.silent_frames, 48);
        assert_eq!(report.gaps, 1);
        assert!(out[48 * BPF..96 * BPF].iter().all(|&b| b == 0));
        assert_eq!(&out[96 * BPF..], &frame_bytes(3, 48)[..]);
    }

    #[test]
    fn hard_cap_drops_oldest() {
        let mut jb = buffer();
        let cap = jb.target_packets() * 4;
        for i in 0..=cap as u32 {
            let result = jb.push(i * 48, frame_bytes(1, 48));
            if i < cap as u32 {
                assert_eq!(
                    result,
                    PushResult::Inserted {
                        dropped_oldest: 0,
                        reordered: false
                    }
                );
            } else {
                assert_eq!(
                    result,
                    PushResult::Inserted {
                        dropped_oldest: 1,
                        reordered: false
                    }
                );
            }
        }
        assert_eq!(jb.level(), cap);
        assert_eq!(jb.head_ts(), Some(48));
    }

    #[test]
    fn timestamp_wrap_is_transparent() {
        let mut jb = buffer();
        let near_wrap = u32::MAX - 23;
        jb.push(near_wrap, frame_bytes(1, 48)); // covers the wrap point
        jb.push(near_wrap.wrapping_add(48), frame_bytes(2, 48));
        assert_eq!(jb.head_ts(), Some(near_wrap));

        let mut out = vec![0u8; 96 * BPF];
        let report = jb.drain(near_wrap, &mut out);
        assert_eq!(report.silent_frames, 0);
        assert_eq!(&out[..48 * BPF], &frame_bytes(1, 48)[..]);
    }

    #[test]
    fn cursor_ahead_of_buffer_discards_stale_entries() {
        let mut jb = buffer();
        jb.push(0, frame_bytes(1, 48));
        jb.push(48, frame_bytes(2, 48));

        // Cursor already at 96: both entries are stale.
        let mut out = vec![0u8; 48 * BPF];
        let report = jb.drain(96, &mut out);
        assert_eq!(report.silent_frames, 48);
        assert!(jb.is_empty());
    }
}
