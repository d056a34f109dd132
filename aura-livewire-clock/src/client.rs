//! Livewire clock receive thread.
//!
//! One thread owns the multicast socket. Every datagram is timestamped
//! against a local monotonic base, the highest-priority master is
//! elected, and master/local phase positions feed the servo. Status is
//! published through one mutex snapshot; the global client is
//! reference counted like the PTP side.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::packet::{local_phase_ns, ClockMaster, ClockSync};
use crate::servo::PhaseServo;
use crate::{LivewireError, SyncState};

/// Standard Livewire clock group, shared by all devices.
const MULTICAST_CLOCK: Ipv4Addr = Ipv4Addr::new(239, 192, 255, 2);
const LIVEWIRE_PORT: u16 = 7000;

static CLIENT: OnceLock<Mutex<Option<ClientHandle>>> = OnceLock::new();
static REF_COUNT: AtomicU32 = AtomicU32::new(0);
static STATUS: OnceLock<Mutex<ClockStatus>> = OnceLock::new();

struct ClientHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Snapshot of the slave's bookkeeping, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ClockStatus {
    pub state: SyncState,
    pub master: Option<ClockMaster>,
    /// Filtered phase error inside one frame, local minus master.
    pub phase_offset_ns: i64,
    pub frequency_ppb: f64,
    /// Clock sync packets accepted from the elected master.
    pub packets: u64,
    /// Completed servo filter windows.
    pub batches: u64,
    pub locked: bool,
}

impl ClockStatus {
    /// One-line status for the stats config key.
    pub fn summary(&self) -> String {
        match self.state {
            SyncState::Disabled => "Livewire clock: disabled".to_string(),
            SyncState::Listening => "Livewire clock: waiting for a master".to_string(),
            SyncState::Uncalibrated => match &self.master {
                Some(m) => format!(
                    "Livewire clock: measuring against {} (prio {})",
                    m.mac_string(),
                    m.priority
                ),
                None => "Livewire clock: measuring".to_string(),
            },
            SyncState::Slave => {
                let master = self
                    .master
                    .map(|m| format!("{} prio {}", m.mac_string(), m.priority))
                    .unwrap_or_else(|| "?".to_string());
                format!(
                    "Livewire clock: following {} | phase {:+.1} us | rate {:+.2} ppm | {}",
                    master,
                    self.phase_offset_ns as f64 / 1_000.0,
                    self.frequency_ppb / 1_000.0,
                    if self.locked { "locked" } else { "settling" }
                )
            }
        }
    }
}

/// Start the clock client (reference counted).
pub fn start(interface: Ipv4Addr) -> Result<(), LivewireError> {
    let prev = REF_COUNT.fetch_add(1, Ordering::SeqCst);
    if prev > 0 {
        return Ok(());
    }

    let client_mutex = CLIENT.get_or_init(|| Mutex::new(None));
    let mut guard = client_mutex.lock();
    if guard.is_some() {
        return Ok(());
    }

    let socket = match clock_socket(interface) {
        Ok(s) => s,
        Err(e) => {
            REF_COUNT.store(0, Ordering::SeqCst);
            return Err(e);
        }
    };

    *STATUS
        .get_or_init(|| Mutex::new(ClockStatus::default()))
        .lock() = ClockStatus {
        state: SyncState::Listening,
        ..Default::default()
    };

    let running = Arc::new(AtomicBool::new(true));
    let thread = {
        let running = running.clone();
        thread::Builder::new()
            .name("lw-clock".into())
            .spawn(move || client_loop(socket, running, interface))
            .map_err(std::io::Error::from)?
    };

    info!(%interface, "livewire clock client started");
    *guard = Some(ClientHandle {
        running,
        thread: Some(thread),
    });
    Ok(())
}

/// Stop the clock client (reference counted).
pub fn stop() {
    let prev = REF_COUNT.fetch_sub(1, Ordering::SeqCst);
    if prev > 1 {
        return;
    }
    stop_all();
}

/// Stop regardless of reference count.
pub fn stop_all() {
    REF_COUNT.store(0, Ordering::SeqCst);

    let client_mutex = match CLIENT.get() {
        Some(m) => m,
        None => return,
    };
    let mut guard = client_mutex.lock();
    if let Some(mut handle) = guard.take() {
        handle.running.store(false, Ordering::SeqCst);
        if let Some(t) = handle.thread.take() {
            let _ = t.join();
        }
        info!("livewire clock client stopped");
    }

    if let Some(status) = STATUS.get() {
        status.lock().state = SyncState::Disabled;
    }
}

pub fn is_running() -> bool {
    REF_COUNT.load(Ordering::SeqCst) > 0
}

pub fn status() -> Option<ClockStatus> {
    STATUS.get().map(|m| m.lock().clone())
}

/// Status line for display, usable whether or not the client ran yet.
pub fn status_line() -> String {
    status()
        .map(|s| s.summary())
        .unwrap_or_else(|| "Livewire clock: disabled".to_string())
}

pub fn state() -> SyncState {
    status().map(|s| s.state).unwrap_or_default()
}

pub fn offset_ns() -> i64 {
    status().map(|s| s.phase_offset_ns).unwrap_or(0)
}

pub fn frequency_ppb() -> f64 {
    status().map(|s| s.frequency_ppb).unwrap_or(0.0)
}

pub fn is_locked() -> bool {
    status().map(|s| s.locked).unwrap_or(false)
}

fn clock_socket(interface: Ipv4Addr) -> Result<UdpSocket, LivewireError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, LIVEWIRE_PORT).into())?;
    socket.join_multicast_v4(&MULTICAST_CLOCK, &interface)?;
    // Read timeout so the thread observes shutdown promptly.
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(socket.into())
}

fn client_loop(socket: UdpSocket, running: Arc<AtomicBool>, interface: Ipv4Addr) {
    let mut servo = PhaseServo::new();
    let epoch = Instant::now();
    let mut master: Option<ClockMaster> = None;
    let mut buf = [0u8; 128];

    while running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(error = %e, "livewire clock receive error");
                continue;
            }
        };

        // Timestamp first; the rest of the iteration is not
        // time-critical.
        let local_ns = epoch.elapsed().as_nanos() as u64;

        let Some(sync) = ClockSync::parse(&buf[..len]) else {
            continue;
        };

        // Election: the highest priority on the wire wins, the elected
        // master stays until outbid.
        match master {
            Some(current) if current.mac == sync.master.mac => {
                if current.priority != sync.master.priority {
                    master = Some(sync.master);
                }
            }
            Some(current) if sync.master.priority <= current.priority => continue,
            _ => {
                debug!(
                    master = %sync.master.mac_string(),
                    priority = sync.master.priority,
                    "livewire master adopted"
                );
                master = Some(sync.master);
                servo.reset();
            }
        }

        servo.update(sync.phase_ns(), local_phase_ns(local_ns));

        let Some(status_mutex) = STATUS.get() else {
            continue;
        };
        let mut status = status_mutex.lock();
        status.packets += 1;
        status.master = master;
        status.phase_offset_ns = servo.offset_ns();
        status.frequency_ppb = servo.frequency_ppb();
        status.batches = servo.batch_count();
        status.locked = servo.is_locked();
        // SLAVE is reached on first lock and sticky after; losing lock
        // later is not a state regression.
        status.state = if status.state == SyncState::Slave || servo.is_locked() {
            SyncState::Slave
        } else {
            SyncState::Uncalibrated
        };
    }

    let _ = socket.leave_multicast_v4(&MULTICAST_CLOCK, &interface);
}
