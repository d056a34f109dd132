//! PI servo steering the slave timebase toward the grandmaster.
//!
//! Input is the relative offset measurement from each Sync/Follow_Up
//! pair. Output is a frequency correction in ppb plus a lock flag with
//! hysteresis, so a single noisy measurement does not bounce the state.

/// Proportional gain (per second of offset error).
const KP: f64 = 0.1;

/// Integral gain.
const KI: f64 = 0.01;

/// Frequency correction clamp, +/- 500 ppm.
const MAX_PPB: f64 = 500_000.0;

/// Lock window: |offset| must stay within 10 us.
const LOCK_WINDOW_NS: i64 = 10_000;

/// Consecutive in-window measurements required to declare lock.
const LOCK_COUNT: u32 = 5;

/// Consecutive out-of-window measurements required to drop lock.
const UNLOCK_COUNT: u32 = 8;

pub struct PiServo {
    offset_ns: i64,
    freq_ppb: f64,
    integral_ns: f64,
    locked: bool,
    in_window: u32,
    out_of_window: u32,
    sample_count: u64,
}

impl PiServo {
    pub fn new() -> Self {
        Self {
            offset_ns: 0,
            freq_ppb: 0.0,
            integral_ns: 0.0,
            locked: false,
            in_window: 0,
            out_of_window: 0,
            sample_count: 0,
        }
    }

    /// Feed one offset measurement (local minus master, nanoseconds).
    pub fn update(&mut self, offset_ns: i64) {
        self.sample_count += 1;
        self.offset_ns = offset_ns;

        self.integral_ns += offset_ns as f64;
        // Anti-windup: keep the integral where it can still be cancelled.
        let integral_limit = MAX_PPB / KI;
        self.integral_ns = self.integral_ns.clamp(-integral_limit, integral_limit);

        // Offset error in ns per sync interval maps directly to ppb.
        let correction = KP * offset_ns as f64 + KI * self.integral_ns;
        self.freq_ppb = (-correction).clamp(-MAX_PPB, MAX_PPB);

        if offset_ns.abs() <= LOCK_WINDOW_NS {
            self.in_window += 1;
            self.out_of_window = 0;
            if self.in_window >= LOCK_COUNT {
                self.locked = true;
            }
        } else {
            self.in_window = 0;
            if self.locked {
                self.out_of_window += 1;
                if self.out_of_window >= UNLOCK_COUNT {
                    self.locked = false;
                    self.out_of_window = 0;
                }
            }
        }
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns
    }

    pub fn frequency_ppb(&self) -> f64 {
        self.freq_ppb
    }

    pub fn frequency_ppm(&self) -> f64 {
        self.freq_ppb / 1_000.0
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Forget all history, e.g. when the grandmaster changes.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PiServo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_on_small_offsets() {
        let mut servo = PiServo::new();
        for _ in 0..LOCK_COUNT {
            servo.update(2_000);
        }
        assert!(servo.is_locked());
    }

    #[test]
    fn stays_unlocked_on_large_offsets() {
        let mut servo = PiServo::new();
        for _ in 0..20 {
            servo.update(1_000_000);
        }
        assert!(!servo.is_locked());
    }

    #[test]
    fn unlock_needs_hysteresis() {
        let mut servo = PiServo::new();
        for _ in 0..LOCK_COUNT {
            servo.update(0);
        }
        assert!(servo.is_locked());

        // A few bad measurements must not drop the lock immediately.
        for _ in 0..UNLOCK_COUNT - 1 {
            servo.update(50_000);
        }
        assert!(servo.is_locked());
        servo.update(50_000);
        assert!(!servo.is_locked());
    }

    #[test]
    fn correction_opposes_offset() {
        let mut servo = PiServo::new();
        for _ in 0..10 {
            servo.update(100_000); // local ahead of master
        }
        assert!(servo.frequency_ppb() < 0.0);

        servo.reset();
        for _ in 0..10 {
            servo.update(-100_000);
        }
        assert!(servo.frequency_ppb() > 0.0);
    }

    #[test]
    fn correction_is_clamped() {
        let mut servo = PiServo::new();
        for _ in 0..1000 {
            servo.update(i64::from(i32::MAX));
        }
        assert!(servo.frequency_ppb().abs() <= MAX_PPB);
    }
}
