//! Shared clock front-end.
//!
//! One process-wide clock, selectable between the PTP slave, the
//! Livewire slave and the free-running system clock. A supervisor
//! thread polls the active source and publishes {offset, frequency,
//! state} through a seqlock; `now_ns()` reads it lock-free and is
//! monotonic across threads.
//!
//! When the network source stops delivering Syncs after having reached
//! SLAVE, the supervisor silently freezes the last offset and reports
//! free-running SLAVE until the source recovers (fallback).

use std::cell::UnsafeCell;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Aes67Error;

/// Selectable clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClockMode {
    Ptp = 0,
    Livewire = 1,
    System = 2,
}

impl TryFrom<u32> for ClockMode {
    type Error = Aes67Error;

    fn try_from(value: u32) -> Result<Self, Aes67Error> {
        match value {
            0 => Ok(ClockMode::Ptp),
            1 => Ok(ClockMode::Livewire),
            2 => Ok(ClockMode::System),
            _ => Err(Aes67Error::ill_param("clock mode must be 0, 1 or 2")),
        }
    }
}

/// Clock state machine, shared numbering with the source crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ClockState {
    #[default]
    Disabled = 0,
    Listening = 1,
    Uncalibrated = 2,
    Slave = 3,
}

impl From<u8> for ClockState {
    fn from(value: u8) -> Self {
        match value {
            1 => ClockState::Listening,
            2 => ClockState::Uncalibrated,
            3 => ClockState::Slave,
            _ => ClockState::Disabled,
        }
    }
}

/// Parameters published by the supervisor, read on the hot paths.
#[derive(Debug, Clone, Copy)]
struct ClockParams {
    /// Disciplined minus raw monotonic time.
    offset_ns: i64,
    /// Frequency correction in ppb (== ppm x 1000).
    freq_ppb: i32,
    state: ClockState,
    /// Raw monotonic time of the last observed source progress.
    last_sync_ns: u64,
}

impl ClockParams {
    const fn disabled() -> Self {
        Self {
            offset_ns: 0,
            freq_ppb: 0,
            state: ClockState::Disabled,
            last_sync_ns: 0,
        }
    }
}

/// Single-writer seqlock. Readers retry while a write is in flight;
/// writes are serialized externally (supervisor thread plus the
/// start/stop paths under SUPERVISOR's mutex).
struct SeqLock<T> {
    seq: AtomicU64,
    data: UnsafeCell<T>,
}

unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    const fn new(value: T) -> Self {
        Self {
            seq: AtomicU64::new(0),
            data: UnsafeCell::new(value),
        }
    }

    fn read(&self) -> T {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let value = unsafe { std::ptr::read_volatile(self.data.get()) };
            std::sync::atomic::fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == s1 {
                return value;
            }
        }
    }

    fn write(&self, value: T) {
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::Release);
        unsafe { std::ptr::write_volatile(self.data.get(), value) };
        self.seq.store(s.wrapping_add(2), Ordering::Release);
    }
}

static PARAMS: SeqLock<ClockParams> = SeqLock::new(ClockParams::disabled());
static MONO_EPOCH: OnceLock<Instant> = OnceLock::new();
static LAST_RETURNED_NS: AtomicU64 = AtomicU64::new(0);
static SOURCE_LOCKED: AtomicBool = AtomicBool::new(false);
static FALLBACK_ACTIVE: AtomicBool = AtomicBool::new(false);
static FALLBACK_TIMEOUT_SECS: AtomicU32 = AtomicU32::new(5);
static SUPERVISOR: Mutex<Option<Supervisor>> = Mutex::new(None);

/// Supervisor poll period.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Supervisor {
    mode: ClockMode,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Raw monotonic nanoseconds since the clock was first touched.
pub fn raw_mono_ns() -> u64 {
    MONO_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Disciplined time. Never decreases, even across an offset step.
pub fn now_ns() -> u64 {
    let params = PARAMS.read();
    let t = raw_mono_ns().saturating_add_signed(params.offset_ns);
    let prev = LAST_RETURNED_NS.fetch_max(t, Ordering::AcqRel);
    t.max(prev)
}

/// Current frequency correction, ppm x 1000 (== ppb).
pub fn ppm_x1000() -> i32 {
    PARAMS.read().freq_ppb
}

pub fn state() -> ClockState {
    PARAMS.read().state
}

pub fn offset_ns() -> i64 {
    PARAMS.read().offset_ns
}

/// Whether the active source reports stable tracking. False while the
/// fallback is carrying the clock.
pub fn is_locked() -> bool {
    SOURCE_LOCKED.load(Ordering::Relaxed)
}

pub fn is_running() -> bool {
    SUPERVISOR.lock().is_some()
}

pub fn set_fallback_timeout(secs: u32) {
    FALLBACK_TIMEOUT_SECS.store(secs, Ordering::Relaxed);
}

/// Begin synchronization. Idempotent for the running mode; starting a
/// different mode while running fails with ALREADY.
pub fn start(mode: ClockMode, domain: u8, interface: Ipv4Addr) -> Result<(), Aes67Error> {
    let mut guard = SUPERVISOR.lock();
    if let Some(sup) = guard.as_ref() {
        if sup.mode == mode {
            return Ok(());
        }
        return Err(Aes67Error::Already);
    }

    match mode {
        ClockMode::Ptp => aura_ptp::start(interface, domain)?,
        ClockMode::Livewire => aura_livewire_clock::start(interface)?,
        ClockMode::System => {}
    }

    let initial_state = if mode == ClockMode::System {
        ClockState::Slave
    } else {
        ClockState::Listening
    };
    let prev = PARAMS.read();
    PARAMS.write(ClockParams {
        offset_ns: prev.offset_ns,
        freq_ppb: 0,
        state: initial_state,
        last_sync_ns: raw_mono_ns(),
    });
    SOURCE_LOCKED.store(mode == ClockMode::System, Ordering::Relaxed);
    FALLBACK_ACTIVE.store(false, Ordering::Relaxed);

    let running = Arc::new(AtomicBool::new(true));
    let thread = {
        let running = running.clone();
        thread::Builder::new()
            .name("clock-supervisor".into())
            .spawn(move || supervisor_loop(mode, running))
            .map_err(|e| {
                stop_source(mode);
                Aes67Error::Init(e.to_string())
            })?
    };

    info!(?mode, domain, %interface, "clock started");
    *guard = Some(Supervisor {
        mode,
        running,
        thread: Some(thread),
    });
    Ok(())
}

/// Halt synchronization. The clock keeps ticking in free-run with the
/// last known offset.
pub fn stop() -> Result<(), Aes67Error> {
    let mut guard = SUPERVISOR.lock();
    let Some(mut sup) = guard.take() else {
        return Err(Aes67Error::NoClock);
    };
    sup.running.store(false, Ordering::SeqCst);
    if let Some(t) = sup.thread.take() {
        let _ = t.join();
    }
    stop_source(sup.mode);

    let prev = PARAMS.read();
    PARAMS.write(ClockParams {
        offset_ns: prev.offset_ns,
        freq_ppb: 0,
        state: ClockState::Disabled,
        last_sync_ns: prev.last_sync_ns,
    });
    SOURCE_LOCKED.store(false, Ordering::Relaxed);
    FALLBACK_ACTIVE.store(false, Ordering::Relaxed);
    info!("clock stopped");
    Ok(())
}

fn stop_source(mode: ClockMode) {
    match mode {
        ClockMode::Ptp => aura_ptp::stop(),
        ClockMode::Livewire => aura_livewire_clock::stop(),
        ClockMode::System => {}
    }
}

/// Status line for the stats config key.
pub fn stats_string() -> String {
    let mode_line = match SUPERVISOR.lock().as_ref().map(|s| s.mode) {
        Some(ClockMode::Ptp) => aura_ptp::stats::status_line(),
        Some(ClockMode::Livewire) => aura_livewire_clock::status_line(),
        Some(ClockMode::System) => "System Clock (free-running)".to_string(),
        None => "Clock: Disabled".to_string(),
    };
    if FALLBACK_ACTIVE.load(Ordering::Relaxed) {
        format!("{} [FALLBACK: system]", mode_line)
    } else {
        mode_line
    }
}

/// One snapshot of the active source, normalized across source kinds.
struct SourceSnapshot {
    state: ClockState,
    offset_ns: i64,
    freq_ppb: i32,
    locked: bool,
    /// Advances whenever the source makes progress (Syncs, packets).
    progress: u64,
}

fn sample_source(mode: ClockMode) -> SourceSnapshot {
    match mode {
        ClockMode::Ptp => {
            let stats = aura_ptp::stats().unwrap_or_default();
            SourceSnapshot {
                state: ClockState::from(stats.state as u8),
                offset_ns: stats.offset_ns,
                freq_ppb: stats.frequency_ppb as i32,
                locked: stats.locked,
                progress: stats.sync_count,
            }
        }
        ClockMode::Livewire => {
            let status = aura_livewire_clock::status().unwrap_or_default();
            SourceSnapshot {
                state: ClockState::from(status.state as u8),
                offset_ns: status.phase_offset_ns,
                freq_ppb: status.frequency_ppb as i32,
                locked: status.locked,
                progress: status.packets,
            }
        }
        ClockMode::System => SourceSnapshot {
            state: ClockState::Slave,
            offset_ns: 0,
            freq_ppb: 0,
            locked: true,
            // The system clock always progresses.
            progress: raw_mono_ns(),
        },
    }
}

/// Decide whether the fallback should engage.
fn fallback_due(reached_slave: bool, timeout_s: u32, since_progress_ns: u64) -> bool {
    reached_slave && timeout_s > 0 && since_progress_ns > timeout_s as u64 * 1_000_000_000
}

fn supervisor_loop(mode: ClockMode, running: Arc<AtomicBool>) {
    let mut reached_slave = mode == ClockMode::System;
    let mut last_progress_value = 0u64;
    let mut last_progress_ns = raw_mono_ns();
    let mut frozen_offset = PARAMS.read().offset_ns;

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let snap = sample_source(mode);
        let now_raw = raw_mono_ns();

        if snap.progress != last_progress_value {
            last_progress_value = snap.progress;
            last_progress_ns = now_raw;
            if FALLBACK_ACTIVE.swap(false, Ordering::Relaxed) {
                info!(?mode, "clock source recovered, leaving fallback");
            }
        }
        if snap.state == ClockState::Slave {
            reached_slave = true;
        }

        let timeout = FALLBACK_TIMEOUT_SECS.load(Ordering::Relaxed);
        let fallback = mode != ClockMode::System
            && (FALLBACK_ACTIVE.load(Ordering::Relaxed)
                || fallback_due(reached_slave, timeout, now_raw - last_progress_ns));

        if fallback && !FALLBACK_ACTIVE.swap(true, Ordering::Relaxed) {
            warn!(
                ?mode,
                timeout_s = timeout,
                "clock source silent, falling back to system clock"
            );
        }

        let params = if fallback {
            // Keep the last disciplined offset and free-run at nominal
            // rate; the reported state stays SLAVE.
            ClockParams {
                offset_ns: frozen_offset,
                freq_ppb: 0,
                state: ClockState::Slave,
                last_sync_ns: last_progress_ns,
            }
        } else {
            frozen_offset = snap.offset_ns;
            ClockParams {
                offset_ns: snap.offset_ns,
                freq_ppb: snap.freq_ppb,
                state: snap.state,
                last_sync_ns: last_progress_ns,
            }
        };
        PARAMS.write(params);
        SOURCE_LOCKED.store(snap.locked && !fallback, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic_across_threads() {
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(std::thread::spawn(|| {
                let mut prev = 0u64;
                for _ in 0..10_000 {
                    let t = now_ns();
                    assert!(t >= prev);
                    prev = t;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn seqlock_read_returns_written_value() {
        let lock = SeqLock::new(7u64);
        assert_eq!(lock.read(), 7);
        lock.write(11);
        assert_eq!(lock.read(), 11);
    }

    #[test]
    fn fallback_decision() {
        // Needs slave history and a nonzero timeout.
        assert!(!fallback_due(false, 5, 10_000_000_000));
        assert!(!fallback_due(true, 0, 10_000_000_000));
        assert!(!fallback_due(true, 5, 4_000_000_000));
        assert!(fallback_due(true, 5, 6_000_000_000));
    }

    #[test]
    fn system_clock_lifecycle() {
        assert!(stop().is_err()); // nothing running yet

        start(ClockMode::System, 0, Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(state(), ClockState::Slave);
        assert_eq!(ppm_x1000(), 0);
        assert!(is_locked());

        // Idempotent for the same mode, ALREADY for another.
        start(ClockMode::System, 0, Ipv4Addr::LOCALHOST).unwrap();
        assert!(matches!(
            start(ClockMode::Livewire, 0, Ipv4Addr::LOCALHOST),
            Err(Aes67Error::Already)
        ));

        stop().unwrap();
        assert_eq!(state(), ClockState::Disabled);
        assert!(stop().is_err());

        // The clock keeps ticking in free-run after stop.
        let a = now_ns();
        std::thread::sleep(Duration::from_millis(2));
        assert!(now_ns() > a);
    }
}
