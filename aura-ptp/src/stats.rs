//! PTP state and statistics, plus the formatted status line.

use parking_lot::Mutex;
use std::sync::OnceLock;

use crate::messages::ClockIdentity;

/// Slave state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PtpState {
    /// Not started.
    #[default]
    Disabled = 0,
    /// Waiting for the first Announce.
    Listening = 1,
    /// Grandmaster adopted, servo not yet settled.
    Uncalibrated = 2,
    /// Tracking the grandmaster.
    Slave = 3,
}

impl PtpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PtpState::Disabled => "DISABLED",
            PtpState::Listening => "LISTENING",
            PtpState::Uncalibrated => "UNCALIBRATED",
            PtpState::Slave => "SLAVE",
        }
    }
}

/// Snapshot of the slave's bookkeeping, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct PtpStats {
    pub state: PtpState,
    pub grandmaster_id: ClockIdentity,
    pub grandmaster_port: u16,
    /// Offset relative to the first measurement, local minus master.
    pub offset_ns: i64,
    pub frequency_ppb: f64,
    pub mean_path_delay_ns: i64,
    pub sync_count: u64,
    pub announce_count: u64,
    pub follow_up_count: u64,
    pub delay_resp_count: u64,
    pub locked: bool,
    pub domain: u8,
    pub clock_class: u8,
}

impl PtpStats {
    /// One-line status, e.g.
    /// `Slave to: PTP/2ccf67fffe55b29a:1, offset 0.9us, Freq: +0.00ppm [LOCKED]`
    pub fn format_display(&self) -> String {
        match self.state {
            PtpState::Disabled => "PTP: Disabled".to_string(),
            PtpState::Listening => "PTP: Listening for grandmaster...".to_string(),
            PtpState::Uncalibrated => format!(
                "PTP: Uncalibrated - GM: {}:{}",
                self.grandmaster_id.to_hex(),
                self.grandmaster_port
            ),
            PtpState::Slave => format!(
                "Slave to: PTP/{}:{}, offset {:.1}us, delay {:.1}us, Freq: {:+.2}ppm{}",
                self.grandmaster_id.to_hex(),
                self.grandmaster_port,
                self.offset_ns as f64 / 1_000.0,
                self.mean_path_delay_ns as f64 / 1_000.0,
                self.frequency_ppb / 1_000.0,
                if self.locked { " [LOCKED]" } else { " [UNLOCKED]" }
            ),
        }
    }

    pub fn format_detailed(&self) -> String {
        format!(
            "PTP Status:\n\
             State: {}\n\
             Grandmaster: {}:{}\n\
             Clock Class: {}\n\
             Domain: {}\n\
             Offset: {:.3}us\n\
             Frequency: {:+.3}ppm\n\
             Path Delay: {:.3}us\n\
             Locked: {}\n\
             Messages: Sync={}, FollowUp={}, Announce={}, DelayResp={}",
            self.state.as_str(),
            self.grandmaster_id.to_hex(),
            self.grandmaster_port,
            self.clock_class,
            self.domain,
            self.offset_ns as f64 / 1_000.0,
            self.frequency_ppb / 1_000.0,
            self.mean_path_delay_ns as f64 / 1_000.0,
            if self.locked { "Yes" } else { "No" },
            self.sync_count,
            self.follow_up_count,
            self.announce_count,
            self.delay_resp_count
        )
    }
}

static STATUS_LINE: OnceLock<Mutex<String>> = OnceLock::new();

pub fn update_status_line(stats: &PtpStats) {
    let line = stats.format_display();
    *STATUS_LINE
        .get_or_init(|| Mutex::new(String::new()))
        .lock() = line;
}

pub fn status_line() -> String {
    STATUS_LINE
        .get_or_init(|| Mutex::new("PTP: Not initialized".to_string()))
        .lock()
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reflects_state() {
        let mut stats = PtpStats::default();
        assert!(stats.format_display().contains("Disabled"));

        stats.state = PtpState::Slave;
        stats.locked = true;
        stats.offset_ns = 900;
        let line = stats.format_display();
        assert!(line.starts_with("Slave to: PTP/"));
        assert!(line.contains("[LOCKED]"));
    }
}
