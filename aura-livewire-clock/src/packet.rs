//! Livewire clock stream wire format.
//!
//! Masters multicast one sync datagram per 250 us frame: an RTP header
//! whose extension block (profile 0xFA1A) carries the master's frame
//! counter, its position inside the frame, and the election fields.
//! Everything leaving this module is in nanoseconds on a 256-frame
//! phase cycle; no other part of the crate works in microticks.

/// One frame is 250 us.
pub const FRAME_NS: u64 = 250_000;
/// Intra-frame resolution of the wire format.
pub const TICKS_PER_FRAME: u32 = 3072;
/// Frame counters are compared modulo this many frames, giving an
/// unambiguous 64 ms phase window.
pub const CYCLE_FRAMES: u32 = 256;
/// Length of the phase cycle in nanoseconds.
pub const CYCLE_NS: u64 = CYCLE_FRAMES as u64 * FRAME_NS;

const EXT_PROFILE_CLOCK: u16 = 0xFA1A;
const BLOCK_TYPE_SYNC: u32 = 0x0C00_CABA;
const BLOCK_MAGIC: u8 = 0xAC;

/// Identity a master advertises in every sync packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockMaster {
    pub mac: [u8; 6],
    /// Election priority, 0-15; the highest on the wire wins.
    pub priority: u8,
    /// Low 15 bits of the master's IP address.
    pub source_id: u16,
}

impl ClockMaster {
    pub fn mac_string(&self) -> String {
        self.mac
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// One validated clock sync observation.
#[derive(Debug, Clone, Copy)]
pub struct ClockSync {
    /// Master frame counter in 250 us units.
    pub frame: u32,
    /// Position inside the frame, 0..TICKS_PER_FRAME.
    pub ticks: u16,
    pub master: ClockMaster,
}

impl ClockSync {
    /// Parse a datagram. Anything that is not a well-formed clock sync
    /// (wrong profile, wrong block type, bad magic, out-of-range
    /// ticks, short packet) comes back as None.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        // 12 bytes of RTP header, then the extension.
        let ext = datagram.get(12..)?;
        if be_u16(ext, 0)? != EXT_PROFILE_CLOCK {
            return None;
        }

        // Clock block: frame, type, ticks, magic, priority, source id,
        // master MAC.
        let block = ext.get(4..24)?;
        if be_u32(block, 4)? != BLOCK_TYPE_SYNC || block[10] != BLOCK_MAGIC {
            return None;
        }
        let ticks = be_u16(block, 8)?;
        if ticks as u32 >= TICKS_PER_FRAME {
            return None;
        }

        Some(Self {
            frame: be_u32(block, 0)?,
            ticks,
            master: ClockMaster {
                priority: block[11],
                source_id: be_u16(block, 12)?,
                mac: block[14..20].try_into().ok()?,
            },
        })
    }

    /// The master's position on the phase cycle, in nanoseconds.
    pub fn phase_ns(&self) -> u64 {
        (self.frame % CYCLE_FRAMES) as u64 * FRAME_NS
            + self.ticks as u64 * FRAME_NS / TICKS_PER_FRAME as u64
    }
}

/// Local position on the phase cycle for a monotonic timestamp.
pub fn local_phase_ns(elapsed_ns: u64) -> u64 {
    elapsed_ns % CYCLE_NS
}

fn be_u16(buf: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(buf.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_datagram(frame: u32, ticks: u16, priority: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 36];
        buf[12..14].copy_from_slice(&EXT_PROFILE_CLOCK.to_be_bytes());
        buf[16..20].copy_from_slice(&frame.to_be_bytes());
        buf[20..24].copy_from_slice(&BLOCK_TYPE_SYNC.to_be_bytes());
        buf[24..26].copy_from_slice(&ticks.to_be_bytes());
        buf[26] = BLOCK_MAGIC;
        buf[27] = priority;
        buf[28..30].copy_from_slice(&0x1234u16.to_be_bytes());
        buf[30..36].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        buf
    }

    #[test]
    fn parse_valid_sync() {
        let sync = ClockSync::parse(&sync_datagram(100_000, 1536, 7)).unwrap();
        assert_eq!(sync.frame, 100_000);
        assert_eq!(sync.ticks, 1536);
        assert_eq!(sync.master.priority, 7);
        assert_eq!(sync.master.source_id, 0x1234);
        assert_eq!(sync.master.mac_string(), "DE:AD:BE:EF:00:01");
    }

    #[test]
    fn reject_malformed_datagrams() {
        let good = sync_datagram(1, 0, 0);
        assert!(ClockSync::parse(&good[..20]).is_none()); // short

        let mut bad = good.clone();
        bad[12] = 0; // wrong extension profile
        assert!(ClockSync::parse(&bad).is_none());

        let mut bad = good.clone();
        bad[20] = 0; // wrong block type
        assert!(ClockSync::parse(&bad).is_none());

        let mut bad = good.clone();
        bad[26] = 0; // bad magic
        assert!(ClockSync::parse(&bad).is_none());

        // Ticks past the frame end.
        assert!(ClockSync::parse(&sync_datagram(1, 3072, 0)).is_none());
    }

    #[test]
    fn phase_is_frame_plus_tick_fraction() {
        // Frame counter folds onto the 256-frame cycle.
        let sync = ClockSync::parse(&sync_datagram(256, 0, 0)).unwrap();
        assert_eq!(sync.phase_ns(), 0);

        // Half a frame of ticks is 125 us.
        let sync = ClockSync::parse(&sync_datagram(3, 1536, 0)).unwrap();
        assert_eq!(sync.phase_ns(), 3 * FRAME_NS + 125_000);
    }

    #[test]
    fn local_phase_wraps_on_the_cycle() {
        assert_eq!(local_phase_ns(0), 0);
        assert_eq!(local_phase_ns(CYCLE_NS + 42), 42);
    }
}
