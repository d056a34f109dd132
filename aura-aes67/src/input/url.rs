//! Parser for the aes67:// URL scheme.
//! Example: aes67://239.192.76.52:5004?iface=192.168.60.102&pt=96&jitter=10

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::Aes67Error;

/// Stream parameters carried by an aes67:// URL, with registry defaults
/// applied by the caller for anything unspecified.
#[derive(Debug, Clone)]
pub struct Aes67Url {
    pub multicast_addr: Ipv4Addr,
    /// RTP port, default 5004.
    pub port: u16,
    pub interface: Option<Ipv4Addr>,
    pub payload_type: u8,
    pub jitter_ms: u32,
    pub channels: u16,
    pub sample_rate: u32,
    /// Wire sample width, 16 or 24.
    pub bits: u16,
}

impl Default for Aes67Url {
    fn default() -> Self {
        Self {
            multicast_addr: Ipv4Addr::new(239, 192, 76, 52),
            port: 5004,
            interface: None,
            payload_type: 96,
            jitter_ms: 10,
            channels: 2,
            sample_rate: 48000,
            bits: 24,
        }
    }
}

impl Aes67Url {
    /// Parse aes67://GROUP:PORT?iface=IP&pt=N&jitter=MS&ch=N&rate=HZ&bits=B
    pub fn parse(url: &str) -> Result<Self, Aes67Error> {
        let rest = url
            .strip_prefix("aes67://")
            .ok_or_else(|| Aes67Error::ill_param("URL must start with aes67://"))?;

        let mut result = Self::default();

        let (host_port, query) = match rest.find('?') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };

        let (host, port_str) = match host_port.rfind(':') {
            Some(pos) => (&host_port[..pos], Some(&host_port[pos + 1..])),
            None => (host_port, None),
        };

        result.multicast_addr = Ipv4Addr::from_str(host)
            .map_err(|_| Aes67Error::ill_param(format!("invalid multicast address '{host}'")))?;
        if !result.multicast_addr.is_multicast() {
            return Err(Aes67Error::ill_param(format!(
                "'{host}' is not a multicast address"
            )));
        }

        if let Some(port_str) = port_str {
            result.port = port_str
                .parse()
                .map_err(|_| Aes67Error::ill_param(format!("invalid port '{port_str}'")))?;
        }

        if let Some(query) = query {
            for param in query.split('&') {
                let mut parts = param.splitn(2, '=');
                let key = parts.next().unwrap_or("");
                let value = parts.next().unwrap_or("");

                match key {
                    "iface" | "interface" => {
                        result.interface = Some(Ipv4Addr::from_str(value).map_err(|_| {
                            Aes67Error::ill_param(format!("invalid interface '{value}'"))
                        })?);
                    }
                    "pt" | "payload" => {
                        result.payload_type = value.parse().map_err(|_| {
                            Aes67Error::ill_param(format!("invalid payload type '{value}'"))
                        })?;
                    }
                    "jitter" => {
                        result.jitter_ms = value.parse().map_err(|_| {
                            Aes67Error::ill_param(format!("invalid jitter '{value}'"))
                        })?;
                    }
                    "ch" | "channels" => {
                        result.channels = value.parse().map_err(|_| {
                            Aes67Error::ill_param(format!("invalid channel count '{value}'"))
                        })?;
                    }
                    "rate" | "samplerate" => {
                        result.sample_rate = value.parse().map_err(|_| {
                            Aes67Error::ill_param(format!("invalid sample rate '{value}'"))
                        })?;
                    }
                    "bits" => {
                        result.bits = value.parse().map_err(|_| {
                            Aes67Error::ill_param(format!("invalid bit depth '{value}'"))
                        })?;
                    }
                    _ => {} // unknown parameters are ignored
                }
            }
        }

        if result.channels == 0 || result.channels > 8 {
            return Err(Aes67Error::ill_param("channels must be 1-8"));
        }
        if !matches!(result.sample_rate, 44100 | 48000 | 96000) {
            return Err(Aes67Error::ill_param(
                "sample rate must be 44100, 48000 or 96000",
            ));
        }
        if !matches!(result.bits, 16 | 24) {
            return Err(Aes67Error::ill_param("bit depth must be 16 or 24"));
        }

        Ok(result)
    }

    /// Bytes per interleaved frame at the declared width.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bits as usize / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic() {
        let url = Aes67Url::parse("aes67://239.192.76.52:5004").unwrap();
        assert_eq!(url.multicast_addr, Ipv4Addr::new(239, 192, 76, 52));
        assert_eq!(url.port, 5004);
        assert_eq!(url.bits, 24);
    }

    #[test]
    fn parse_with_params() {
        let url = Aes67Url::parse(
            "aes67://239.192.76.52:5004?iface=192.168.60.102&pt=98&jitter=20&ch=2&rate=96000&bits=16",
        )
        .unwrap();
        assert_eq!(url.interface, Some(Ipv4Addr::new(192, 168, 60, 102)));
        assert_eq!(url.payload_type, 98);
        assert_eq!(url.jitter_ms, 20);
        assert_eq!(url.sample_rate, 96000);
        assert_eq!(url.bits, 16);
        assert_eq!(url.bytes_per_frame(), 4);
    }

    #[test]
    fn reject_bad_urls() {
        assert!(Aes67Url::parse("rtp://239.0.0.1:5004").is_err());
        assert!(Aes67Url::parse("aes67://10.0.0.1:5004").is_err()); // not multicast
        assert!(Aes67Url::parse("aes67://239.0.0.1:notaport").is_err());
        assert!(Aes67Url::parse("aes67://239.0.0.1:5004?rate=22050").is_err());
        assert!(Aes67Url::parse("aes67://239.0.0.1:5004?bits=8").is_err());
        assert!(Aes67Url::parse("aes67://239.0.0.1:5004?ch=0").is_err());
    }
}
