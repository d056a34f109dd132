//! Phase servo for the Livewire clock.
//!
//! Each sync packet yields one phase measurement: the master's position
//! on the 64 ms cycle against the local arrival position. Network
//! queueing can only delay a packet, so the smallest offset of a window
//! is the one closest to the truth; that window minimum feeds a PI loop
//! producing the frequency output, with the same lock-hysteresis
//! contract as the PTP servo.
//!
//! The audio clock only has to agree on the position inside one 250 us
//! frame, so measured offsets are folded into half a frame before
//! steering; a stream that is whole frames away is a buffer offset, not
//! a rate error.

use crate::packet::{CYCLE_NS, FRAME_NS};

/// Measurements per filter window (~8 ms of wire time).
const WINDOW: u32 = 32;

const KP: f64 = 0.08;
const KI: f64 = 0.005;

/// Frequency output clamp, +/- 200 ppm.
const MAX_PPB: f64 = 200_000.0;

/// Lock window: the filtered phase error must stay within 25 us.
const LOCK_WINDOW_NS: i64 = 25_000;

/// Consecutive in-window batches required to declare lock.
const LOCK_COUNT: u32 = 4;

/// Consecutive out-of-window batches required to drop lock.
const UNLOCK_COUNT: u32 = 6;

pub struct PhaseServo {
    offset_ns: i64,
    freq_ppb: f64,
    integral_ns: f64,
    /// Smallest offset seen in the current window.
    window_min_ns: i64,
    window_fill: u32,
    batch_count: u64,
    sample_count: u64,
    locked: bool,
    in_window: u32,
    out_of_window: u32,
}

impl PhaseServo {
    pub fn new() -> Self {
        Self {
            offset_ns: 0,
            freq_ppb: 0.0,
            integral_ns: 0.0,
            window_min_ns: 0,
            window_fill: 0,
            batch_count: 0,
            sample_count: 0,
            locked: false,
            in_window: 0,
            out_of_window: 0,
        }
    }

    /// Feed one sync observation. Both arguments are positions on the
    /// phase cycle in nanoseconds. Returns true when a filter window
    /// completed and the outputs moved.
    pub fn update(&mut self, remote_phase_ns: u64, local_phase_ns: u64) -> bool {
        self.sample_count += 1;

        let offset = cycle_delta_ns(local_phase_ns, remote_phase_ns);
        if self.window_fill == 0 || offset < self.window_min_ns {
            self.window_min_ns = offset;
        }
        self.window_fill += 1;
        if self.window_fill < WINDOW {
            return false;
        }

        let filtered = self.window_min_ns;
        self.window_fill = 0;
        self.batch_count += 1;
        self.steer(filtered);
        true
    }

    /// Run the PI loop on one filtered offset.
    fn steer(&mut self, offset_ns: i64) {
        let frame = FRAME_NS as i64;
        let mut phase = offset_ns % frame;
        if phase > frame / 2 {
            phase -= frame;
        } else if phase < -frame / 2 {
            phase += frame;
        }
        self.offset_ns = phase;

        self.integral_ns += phase as f64;
        // Anti-windup: keep the integral where it can still be
        // cancelled.
        let integral_limit = MAX_PPB / KI;
        self.integral_ns = self.integral_ns.clamp(-integral_limit, integral_limit);

        let correction = KP * phase as f64 + KI * self.integral_ns;
        self.freq_ppb = (-correction).clamp(-MAX_PPB, MAX_PPB);

        if phase.abs() <= LOCK_WINDOW_NS {
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

    /// Filtered phase error inside one frame, local minus master.
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

    /// Completed filter windows.
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Forget all history, e.g. when the master changes.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PhaseServo {
    fn default() -> Self {
        Self::new()
    }
}

/// Difference of two positions on the phase cycle, folded to the
/// nearest half cycle. Positive when `a` is ahead of `b`.
fn cycle_delta_ns(a: u64, b: u64) -> i64 {
    let cycle = CYCLE_NS as i64;
    let mut d = a as i64 - b as i64;
    if d > cycle / 2 {
        d -= cycle;
    } else if d < -(cycle / 2) {
        d += cycle;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_windows(servo: &mut PhaseServo, offset_ns: u64, windows: u32) {
        for _ in 0..windows * WINDOW {
            servo.update(1_000_000, 1_000_000 + offset_ns);
        }
    }

    #[test]
    fn cycle_delta_folds_the_wrap() {
        assert_eq!(cycle_delta_ns(5_000, 1_000), 4_000);
        assert_eq!(cycle_delta_ns(1_000, 5_000), -4_000);
        // Positions straddling the 64 ms wrap stay small.
        assert_eq!(cycle_delta_ns(CYCLE_NS - 1_000, 1_000), -2_000);
        assert_eq!(cycle_delta_ns(1_000, CYCLE_NS - 1_000), 2_000);
    }

    #[test]
    fn aligned_phases_lock() {
        let mut servo = PhaseServo::new();
        run_windows(&mut servo, 0, LOCK_COUNT);
        assert_eq!(servo.batch_count(), LOCK_COUNT as u64);
        assert!(servo.is_locked());
        assert_eq!(servo.offset_ns(), 0);
        assert_eq!(servo.frequency_ppb(), 0.0);
    }

    #[test]
    fn constant_lag_steers_against_it() {
        let mut servo = PhaseServo::new();
        // Local consistently 40 us late: outside the lock window, and
        // the rate output must push the other way.
        run_windows(&mut servo, 40_000, LOCK_COUNT + 2);
        assert_eq!(servo.offset_ns(), 40_000);
        assert!(servo.frequency_ppb() < 0.0);
        assert!(!servo.is_locked());
    }

    #[test]
    fn window_minimum_rejects_queueing_jitter() {
        let mut servo = PhaseServo::new();
        // Most packets are delayed by 30 us, but one per window gets
        // through at the true 2 us offset. The minimum must win.
        for _ in 0..LOCK_COUNT {
            for i in 0..WINDOW {
                let delay = if i == 7 { 2_000 } else { 30_000 };
                servo.update(0, delay);
            }
        }
        assert_eq!(servo.offset_ns(), 2_000);
        assert!(servo.is_locked());
    }

    #[test]
    fn whole_frames_fold_away() {
        let mut servo = PhaseServo::new();
        // Three frames plus 10 us: only the 10 us is a phase error.
        run_windows(&mut servo, 3 * FRAME_NS + 10_000, 1);
        assert_eq!(servo.offset_ns(), 10_000);
    }

    #[test]
    fn unlock_needs_hysteresis() {
        let mut servo = PhaseServo::new();
        run_windows(&mut servo, 0, LOCK_COUNT);
        assert!(servo.is_locked());

        run_windows(&mut servo, 60_000, UNLOCK_COUNT - 1);
        assert!(servo.is_locked());
        run_windows(&mut servo, 60_000, 1);
        assert!(!servo.is_locked());
    }

    #[test]
    fn output_is_clamped() {
        let mut servo = PhaseServo::new();
        run_windows(&mut servo, 124_000, 50);
        assert!(servo.frequency_ppb().abs() <= MAX_PPB);
    }
}
