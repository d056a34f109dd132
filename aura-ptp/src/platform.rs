//! High-resolution wall-clock timestamps.
//!
//! PTP measurements compare local receive times against master-epoch
//! timestamps, so these must be epoch-based. Windows needs
//! GetSystemTimePreciseAsFileTime for sub-microsecond resolution.

#[cfg(windows)]
mod windows_time {
    #[repr(C)]
    struct FILETIME {
        dw_low_date_time: u32,
        dw_high_date_time: u32,
    }

    #[link(name = "kernel32")]
    extern "system" {
        fn GetSystemTimePreciseAsFileTime(lpSystemTimeAsFileTime: *mut FILETIME);
    }

    // 100ns intervals between the FILETIME epoch (1601) and Unix epoch (1970).
    const FILETIME_TO_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

    pub fn wall_clock_ns() -> i64 {
        let mut ft = FILETIME {
            dw_low_date_time: 0,
            dw_high_date_time: 0,
        };
        unsafe {
            GetSystemTimePreciseAsFileTime(&mut ft);
        }
        let filetime = (ft.dw_high_date_time as i64) << 32 | ft.dw_low_date_time as i64;
        (filetime - FILETIME_TO_UNIX_EPOCH) * 100
    }
}

/// Nanoseconds since the Unix epoch.
#[cfg(windows)]
pub fn wall_clock_ns() -> i64 {
    windows_time::wall_clock_ns()
}

/// Nanoseconds since the Unix epoch.
#[cfg(not(windows))]
pub fn wall_clock_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_nanos() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_advances() {
        let a = wall_clock_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = wall_clock_ns();
        assert!(b > a);
    }
}
