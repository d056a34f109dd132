//! RTP packet builder for transmit.
//!
//! Sequence and timestamp advance automatically; payload is converted
//! from host order to network big-endian on the way in.

/// Builds AES67 RTP packets into a reused buffer.
pub struct RtpPacketBuilder {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    payload_type: u8,
    packet_buffer: Vec<u8>,
}

impl RtpPacketBuilder {
    pub fn new(ssrc: u32, payload_type: u8) -> Self {
        Self {
            ssrc,
            sequence: 0,
            timestamp: 0,
            payload_type,
            // 12-byte header + up to 5 ms of 8ch L24 at 48 kHz
            packet_buffer: Vec::with_capacity(12 + 5760),
        }
    }

    /// Build one packet from host-order PCM. `frames` is the number of
    /// per-channel samples the payload covers, which is what the RTP
    /// timestamp advances by.
    pub fn build_packet(&mut self, pcm: &[u8], frames: u32, bits: u16) -> &[u8] {
        let packet_size = 12 + pcm.len();
        self.packet_buffer.clear();
        self.packet_buffer.resize(12, 0);

        // V=2, P=0, X=0, CC=0
        self.packet_buffer[0] = 0x80;
        // M=0, PT
        self.packet_buffer[1] = self.payload_type & 0x7F;
        self.packet_buffer[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        self.packet_buffer[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        self.packet_buffer[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        host_to_wire(pcm, bits, &mut self.packet_buffer);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);

        &self.packet_buffer[..packet_size]
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }
}

/// Append host-order PCM to `out` in network byte order.
pub fn host_to_wire(pcm: &[u8], bits: u16, out: &mut Vec<u8>) {
    if cfg!(target_endian = "big") {
        out.extend_from_slice(pcm);
        return;
    }
    let width = bits as usize / 8;
    for sample in pcm.chunks_exact(width) {
        out.extend(sample.iter().rev());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::rtp::wire_to_host;

    #[test]
    fn header_and_counters() {
        let mut builder = RtpPacketBuilder::new(0x12345678, 96);

        // 48 stereo L24 frames, 1 ms at 48 kHz.
        let pcm = vec![0u8; 288];
        let packet = builder.build_packet(&pcm, 48, 24);

        assert_eq!(packet.len(), 12 + 288);
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1], 96);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
        assert_eq!(
            u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            0
        );
        assert_eq!(
            u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
            0x12345678
        );

        let packet2 = builder.build_packet(&pcm, 48, 24);
        assert_eq!(u16::from_be_bytes([packet2[2], packet2[3]]), 1);
        assert_eq!(
            u32::from_be_bytes([packet2[4], packet2[5], packet2[6], packet2[7]]),
            48
        );
    }

    #[test]
    fn payload_round_trips_through_wire_order() {
        let mut builder = RtpPacketBuilder::new(1, 96);
        let pcm: Vec<u8> = (0..24).collect();
        let packet = builder.build_packet(&pcm, 4, 24).to_vec();
        assert_eq!(wire_to_host(&packet[12..], 24), pcm);

        let pcm16: Vec<u8> = (0..16).collect();
        let packet = builder.build_packet(&pcm16, 4, 16).to_vec();
        assert_eq!(wire_to_host(&packet[12..], 16), pcm16);
    }
}
