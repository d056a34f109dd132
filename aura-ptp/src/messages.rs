//! PTPv2 (IEEE 1588-2008) wire format.
//!
//! Only the message subset a slave needs: Announce, Sync, Follow_Up,
//! Delay_Req (sent) and Delay_Resp (received). Field offsets follow the
//! common 34-byte header layout of the standard.

/// PTP message types (lower nibble of byte 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    FollowUp = 0x8,
    DelayResp = 0x9,
    Announce = 0xB,
    Other = 0xF,
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Sync,
            0x1 => Self::DelayReq,
            0x8 => Self::FollowUp,
            0x9 => Self::DelayResp,
            0xB => Self::Announce,
            _ => Self::Other,
        }
    }
}

/// EUI-64 clock identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 8];
        if bytes.len() >= 8 {
            id.copy_from_slice(&bytes[..8]);
        }
        Self(id)
    }

    /// Hex form used in status strings, e.g. "2ccf67fffe55b29a".
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Clock identity plus port number, identifying one PTP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortIdentity {
    pub clock_identity: ClockIdentity,
    pub port_number: u16,
}

impl PortIdentity {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        Some(Self {
            clock_identity: ClockIdentity::from_bytes(&bytes[0..8]),
            port_number: u16::from_be_bytes([bytes[8], bytes[9]]),
        })
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.clock_identity.0);
        out[8..10].copy_from_slice(&self.port_number.to_be_bytes());
    }
}

/// PTP timestamp: 48-bit seconds + 32-bit nanoseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtpTimestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl PtpTimestamp {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        let seconds = u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ]);
        let nanoseconds = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        Some(Self {
            seconds,
            nanoseconds,
        })
    }

    pub fn to_ns(&self) -> i64 {
        self.seconds as i64 * 1_000_000_000 + self.nanoseconds as i64
    }
}

/// Common 34-byte PTP header.
#[derive(Debug, Clone)]
pub struct PtpHeader {
    pub message_type: MessageType,
    pub version: u8,
    pub message_length: u16,
    pub domain_number: u8,
    pub flags: u16,
    pub correction_field: i64,
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub control_field: u8,
    pub log_message_interval: i8,
}

impl PtpHeader {
    pub const SIZE: usize = 34;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            message_type: MessageType::from(data[0]),
            version: data[1] & 0x0F,
            message_length: u16::from_be_bytes([data[2], data[3]]),
            domain_number: data[4],
            flags: u16::from_be_bytes([data[6], data[7]]),
            correction_field: i64::from_be_bytes(data[8..16].try_into().ok()?),
            source_port_identity: PortIdentity::from_bytes(&data[20..30])?,
            sequence_id: u16::from_be_bytes([data[30], data[31]]),
            control_field: data[32],
            log_message_interval: data[33] as i8,
        })
    }

    /// Two-step flag: the precise origin timestamp arrives in a Follow_Up.
    pub fn is_two_step(&self) -> bool {
        (self.flags & 0x0200) != 0
    }
}

/// Grandmaster clock quality block from an Announce.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

/// Announce message: grandmaster identity and quality.
#[derive(Debug, Clone)]
pub struct Announce {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
    pub current_utc_offset: i16,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_source: u8,
}

impl Announce {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != MessageType::Announce {
            return None;
        }
        let body = &data[PtpHeader::SIZE..];
        if body.len() < 30 {
            return None;
        }
        Some(Self {
            header,
            origin_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
            current_utc_offset: i16::from_be_bytes([body[10], body[11]]),
            grandmaster_priority1: body[13],
            grandmaster_clock_quality: ClockQuality {
                clock_class: body[14],
                clock_accuracy: body[15],
                offset_scaled_log_variance: u16::from_be_bytes([body[16], body[17]]),
            },
            grandmaster_priority2: body[18],
            grandmaster_identity: ClockIdentity::from_bytes(&body[19..27]),
            steps_removed: u16::from_be_bytes([body[27], body[28]]),
            time_source: body[29],
        })
    }
}

/// Sync message. In two-step mode the origin timestamp is approximate.
#[derive(Debug, Clone)]
pub struct Sync {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
}

impl Sync {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != MessageType::Sync {
            return None;
        }
        let body = &data[PtpHeader::SIZE..];
        Some(Self {
            header,
            origin_timestamp: PtpTimestamp::from_bytes(body.get(0..10)?)?,
        })
    }
}

/// Follow_Up carrying the precise Sync transmit time (t1).
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub header: PtpHeader,
    pub precise_origin_timestamp: PtpTimestamp,
}

impl FollowUp {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != MessageType::FollowUp {
            return None;
        }
        let body = &data[PtpHeader::SIZE..];
        Some(Self {
            header,
            precise_origin_timestamp: PtpTimestamp::from_bytes(body.get(0..10)?)?,
        })
    }
}

/// Delay_Req, built by the slave. The origin timestamp on the wire stays
/// zero; the actual transmit time is captured locally at send.
#[derive(Debug, Clone)]
pub struct DelayReq {
    pub source_port: PortIdentity,
    pub sequence_id: u16,
    pub domain: u8,
}

impl DelayReq {
    pub const SIZE: usize = PtpHeader::SIZE + 10;

    pub fn new(source_port: PortIdentity, sequence_id: u16, domain: u8) -> Self {
        Self {
            source_port,
            sequence_id,
            domain,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0] = MessageType::DelayReq as u8;
        buf[1] = 2; // PTPv2
        buf[2..4].copy_from_slice(&(Self::SIZE as u16).to_be_bytes());
        buf[4] = self.domain;
        self.source_port.write_to(&mut buf[20..30]);
        buf[30..32].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[32] = 1; // Delay_Req control field
        buf[33] = 0x7F; // no periodic interval
        buf
    }
}

/// Delay_Resp carrying the master receive time of our Delay_Req (t4).
#[derive(Debug, Clone)]
pub struct DelayResp {
    pub header: PtpHeader,
    pub receive_timestamp: PtpTimestamp,
    pub requesting_port_identity: PortIdentity,
}

impl DelayResp {
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = PtpHeader::parse(data)?;
        if header.message_type != MessageType::DelayResp {
            return None;
        }
        let body = &data[PtpHeader::SIZE..];
        if body.len() < 20 {
            return None;
        }
        Some(Self {
            header,
            receive_timestamp: PtpTimestamp::from_bytes(&body[0..10])?,
            requesting_port_identity: PortIdentity::from_bytes(&body[10..20])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(msg_type: u8, domain: u8, seq: u16, len: u16) -> Vec<u8> {
        let mut buf = vec![0u8; PtpHeader::SIZE];
        buf[0] = msg_type;
        buf[1] = 2;
        buf[2..4].copy_from_slice(&len.to_be_bytes());
        buf[4] = domain;
        buf[20..28].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x01, 0x02]);
        buf[28..30].copy_from_slice(&1u16.to_be_bytes());
        buf[30..32].copy_from_slice(&seq.to_be_bytes());
        buf
    }

    fn push_timestamp(buf: &mut Vec<u8>, secs: u64, nanos: u32) {
        buf.extend_from_slice(&secs.to_be_bytes()[2..8]);
        buf.extend_from_slice(&nanos.to_be_bytes());
    }

    #[test]
    fn header_roundtrip() {
        let buf = header_bytes(0x0, 7, 1234, 44);
        let header = PtpHeader::parse(&buf).unwrap();
        assert_eq!(header.message_type, MessageType::Sync);
        assert_eq!(header.version, 2);
        assert_eq!(header.domain_number, 7);
        assert_eq!(header.sequence_id, 1234);
        assert_eq!(
            header.source_port_identity.clock_identity.to_hex(),
            "aabbccddeeff0102"
        );
    }

    #[test]
    fn sync_and_follow_up_parse() {
        let mut buf = header_bytes(0x0, 0, 9, 44);
        push_timestamp(&mut buf, 1_700_000_000, 250_000_000);
        let sync = Sync::parse(&buf).unwrap();
        assert_eq!(
            sync.origin_timestamp.to_ns(),
            1_700_000_000i64 * 1_000_000_000 + 250_000_000
        );

        buf[0] = 0x8;
        let fup = FollowUp::parse(&buf).unwrap();
        assert_eq!(fup.header.sequence_id, 9);
        assert!(Sync::parse(&buf).is_none());
    }

    #[test]
    fn announce_parse() {
        let mut buf = header_bytes(0xB, 0, 1, 64);
        push_timestamp(&mut buf, 0, 0);
        buf.extend_from_slice(&37i16.to_be_bytes()); // UTC offset
        buf.push(0); // reserved
        buf.push(128); // priority1
        buf.extend_from_slice(&[6, 0x21, 0x00, 0x00]); // clock quality
        buf.push(128); // priority2
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // gm identity
        buf.extend_from_slice(&0u16.to_be_bytes()); // steps removed
        buf.push(0xA0); // time source
        let ann = Announce::parse(&buf).unwrap();
        assert_eq!(ann.current_utc_offset, 37);
        assert_eq!(ann.grandmaster_clock_quality.clock_class, 6);
        assert_eq!(ann.grandmaster_identity.to_hex(), "0102030405060708");
    }

    #[test]
    fn delay_req_roundtrip() {
        let port = PortIdentity {
            clock_identity: ClockIdentity([9, 8, 7, 6, 5, 4, 3, 2]),
            port_number: 1,
        };
        let req = DelayReq::new(port, 77, 3);
        let bytes = req.to_bytes();
        assert_eq!(bytes.len(), DelayReq::SIZE);
        let header = PtpHeader::parse(&bytes).unwrap();
        assert_eq!(header.message_type, MessageType::DelayReq);
        assert_eq!(header.domain_number, 3);
        assert_eq!(header.sequence_id, 77);
        assert_eq!(header.source_port_identity, port);
    }

    #[test]
    fn delay_resp_parse() {
        let mut buf = header_bytes(0x9, 0, 77, 54);
        push_timestamp(&mut buf, 100, 500);
        let mut port = vec![0u8; 10];
        PortIdentity {
            clock_identity: ClockIdentity([9, 8, 7, 6, 5, 4, 3, 2]),
            port_number: 1,
        }
        .write_to(&mut port);
        buf.extend_from_slice(&port);
        let resp = DelayResp::parse(&buf).unwrap();
        assert_eq!(resp.receive_timestamp.to_ns(), 100_000_000_500);
        assert_eq!(resp.requesting_port_identity.port_number, 1);
    }
}
