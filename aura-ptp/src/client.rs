//! PTP slave client.
//!
//! Two receive threads own the event (319) and general (320) sockets;
//! both feed a shared slave state guarded by one mutex. The global client
//! is reference counted so the clock front-end and tooling can start it
//! independently.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::messages::*;
use crate::platform;
use crate::servo::PiServo;
use crate::stats::{self, PtpState, PtpStats};
use crate::PtpError;

/// PTP primary multicast group.
const PTP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);
/// Event port: Sync, Delay_Req.
const PTP_EVENT_PORT: u16 = 319;
/// General port: Announce, Follow_Up, Delay_Resp.
const PTP_GENERAL_PORT: u16 = 320;

/// Sync pairs observed before SLAVE can be declared.
const MIN_SYNC_FOR_SLAVE: u64 = 5;

/// One Delay_Req is sent per this many Syncs.
const DELAY_REQ_INTERVAL: u64 = 8;

static CLIENT: OnceLock<Mutex<Option<ClientHandle>>> = OnceLock::new();
static REFERENCE_COUNT: AtomicU32 = AtomicU32::new(0);

struct ClientHandle {
    running: Arc<AtomicBool>,
    slave: Arc<Mutex<SlaveState>>,
    event_thread: Option<JoinHandle<()>>,
    general_thread: Option<JoinHandle<()>>,
}

/// Bookkeeping shared by both receive threads.
struct SlaveState {
    grandmaster: Option<PortIdentity>,
    servo: PiServo,
    stats: PtpStats,
    /// Sync waiting for its Follow_Up: (sequence, t2 receive time).
    pending_sync: Option<(u16, i64)>,
    /// Delay_Req waiting for its Delay_Resp: (sequence, t3 send time).
    pending_delay: Option<(u16, i64)>,
    /// Raw (t2 - t1) of the most recent completed Sync, for path delay.
    last_sync_diff_ns: Option<i64>,
    /// First raw measurement. A software slave cannot step the OS clock,
    /// so the TAI epoch difference and the constant part of the path
    /// delay are cancelled against this baseline.
    baseline_ns: Option<i64>,
    local_port: PortIdentity,
    delay_req_seq: u16,
    event_socket: Option<UdpSocket>,
}

impl SlaveState {
    fn new(domain: u8) -> Self {
        Self {
            grandmaster: None,
            servo: PiServo::new(),
            stats: PtpStats {
                state: PtpState::Listening,
                domain,
                ..Default::default()
            },
            pending_sync: None,
            pending_delay: None,
            last_sync_diff_ns: None,
            baseline_ns: None,
            local_port: local_port_identity(),
            delay_req_seq: 0,
            event_socket: None,
        }
    }
}

/// Start the global slave (reference counted).
pub fn start(interface: Ipv4Addr, domain: u8) -> Result<(), PtpError> {
    let prev = REFERENCE_COUNT.fetch_add(1, Ordering::SeqCst);
    if prev > 0 {
        return Ok(());
    }

    let client_mutex = CLIENT.get_or_init(|| Mutex::new(None));
    let mut guard = client_mutex.lock();
    if guard.is_some() {
        return Ok(());
    }

    let event_socket = match multicast_socket(interface, PTP_EVENT_PORT) {
        Ok(s) => s,
        Err(e) => {
            REFERENCE_COUNT.store(0, Ordering::SeqCst);
            return Err(e);
        }
    };
    let general_socket = match multicast_socket(interface, PTP_GENERAL_PORT) {
        Ok(s) => s,
        Err(e) => {
            REFERENCE_COUNT.store(0, Ordering::SeqCst);
            return Err(e);
        }
    };

    let slave = Arc::new(Mutex::new(SlaveState::new(domain)));
    slave.lock().event_socket = Some(event_socket.try_clone()?);

    let running = Arc::new(AtomicBool::new(true));

    let event_thread = {
        let running = running.clone();
        let slave = slave.clone();
        thread::Builder::new()
            .name("ptp-event".into())
            .spawn(move || event_loop(event_socket, running, slave, domain))
            .map_err(std::io::Error::from)?
    };
    let general_thread = {
        let running = running.clone();
        let slave = slave.clone();
        thread::Builder::new()
            .name("ptp-general".into())
            .spawn(move || general_loop(general_socket, running, slave, domain))
            .map_err(std::io::Error::from)?
    };

    info!(%interface, domain, "ptp slave started");
    stats::update_status_line(&slave.lock().stats);

    *guard = Some(ClientHandle {
        running,
        slave,
        event_thread: Some(event_thread),
        general_thread: Some(general_thread),
    });
    Ok(())
}

/// Stop the global slave (reference counted).
pub fn stop() {
    let prev = REFERENCE_COUNT.fetch_sub(1, Ordering::SeqCst);
    if prev != 1 {
        if prev == 0 {
            REFERENCE_COUNT.store(0, Ordering::SeqCst);
        }
        return;
    }
    shutdown();
}

/// Stop regardless of reference count.
pub fn stop_all() {
    REFERENCE_COUNT.store(0, Ordering::SeqCst);
    shutdown();
}

fn shutdown() {
    let client_mutex = match CLIENT.get() {
        Some(m) => m,
        None => return,
    };
    let mut guard = client_mutex.lock();
    if let Some(mut handle) = guard.take() {
        handle.running.store(false, Ordering::SeqCst);
        if let Some(t) = handle.event_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = handle.general_thread.take() {
            let _ = t.join();
        }
        info!("ptp slave stopped");
    }
}

pub fn is_running() -> bool {
    REFERENCE_COUNT.load(Ordering::SeqCst) > 0
}

pub fn stats() -> Option<PtpStats> {
    let guard = CLIENT.get()?.lock();
    guard.as_ref().map(|h| h.slave.lock().stats.clone())
}

pub fn state() -> PtpState {
    stats().map(|s| s.state).unwrap_or(PtpState::Disabled)
}

pub fn offset_ns() -> i64 {
    stats().map(|s| s.offset_ns).unwrap_or(0)
}

pub fn frequency_ppb() -> f64 {
    stats().map(|s| s.frequency_ppb).unwrap_or(0.0)
}

pub fn is_locked() -> bool {
    stats().map(|s| s.locked).unwrap_or(false)
}

fn multicast_socket(interface: Ipv4Addr, port: u16) -> Result<UdpSocket, PtpError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&PTP_MULTICAST_ADDR, &interface)?;
    // Read timeout so the threads observe shutdown promptly.
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(socket.into())
}

fn local_port_identity() -> PortIdentity {
    // Pseudo-random identity from the clock; a MAC would be better but
    // the identity only has to be unique on the local segment.
    let seed = platform::wall_clock_ns() as u64;
    PortIdentity {
        clock_identity: ClockIdentity(seed.to_be_bytes()),
        port_number: 1,
    }
}

/// Event socket loop: Sync messages carry the timing-critical receive
/// timestamp, taken as close to recv as possible.
fn event_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    slave: Arc<Mutex<SlaveState>>,
    domain: u8,
) {
    let mut buf = [0u8; 512];
    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let t2 = platform::wall_clock_ns();
                let Some(header) = PtpHeader::parse(&buf[..len]) else {
                    continue;
                };
                if header.domain_number != domain {
                    continue;
                }
                if header.message_type == MessageType::Sync {
                    if let Some(sync) = Sync::parse(&buf[..len]) {
                        handle_sync(&slave, &sync, t2);
                    }
                }
            }
            Err(ref e) if recoverable(e) => continue,
            Err(e) => {
                warn!(error = %e, "ptp event socket failed");
                break;
            }
        }
    }
}

fn general_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    slave: Arc<Mutex<SlaveState>>,
    domain: u8,
) {
    let mut buf = [0u8; 512];
    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(len) => {
                let Some(header) = PtpHeader::parse(&buf[..len]) else {
                    continue;
                };
                if header.domain_number != domain {
                    continue;
                }
                match header.message_type {
                    MessageType::Announce => {
                        if let Some(announce) = Announce::parse(&buf[..len]) {
                            handle_announce(&slave, &announce);
                        }
                    }
                    MessageType::FollowUp => {
                        if let Some(follow_up) = FollowUp::parse(&buf[..len]) {
                            handle_follow_up(&slave, &follow_up);
                        }
                    }
                    MessageType::DelayResp => {
                        if let Some(resp) = DelayResp::parse(&buf[..len]) {
                            handle_delay_resp(&slave, &resp);
                        }
                    }
                    _ => {}
                }
            }
            Err(ref e) if recoverable(e) => continue,
            Err(e) => {
                warn!(error = %e, "ptp general socket failed");
                break;
            }
        }
    }
}

fn recoverable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Simplified best-master selection: the first announced master on the
/// domain wins; a later master only takes over with a lower clock
/// identity.
fn handle_announce(slave: &Arc<Mutex<SlaveState>>, announce: &Announce) {
    let mut s = slave.lock();
    let candidate = announce.header.source_port_identity;

    let adopt = match s.grandmaster {
        None => true,
        Some(current) => {
            current != candidate
                && candidate.clock_identity < current.clock_identity
        }
    };

    if adopt {
        if s.grandmaster.is_some() {
            info!(
                grandmaster = %announce.grandmaster_identity.to_hex(),
                "ptp grandmaster changed, resetting servo"
            );
            s.servo.reset();
            s.baseline_ns = None;
            s.pending_sync = None;
            s.last_sync_diff_ns = None;
        }
        s.grandmaster = Some(candidate);
        s.stats.grandmaster_id = announce.grandmaster_identity;
        s.stats.grandmaster_port = candidate.port_number;
        s.stats.clock_class = announce.grandmaster_clock_quality.clock_class;
        if s.stats.state == PtpState::Listening {
            s.stats.state = PtpState::Uncalibrated;
        }
    }

    s.stats.announce_count += 1;
    stats::update_status_line(&s.stats);
}

fn handle_sync(slave: &Arc<Mutex<SlaveState>>, sync: &Sync, t2_ns: i64) {
    let mut s = slave.lock();
    match s.grandmaster {
        Some(gm) if gm == sync.header.source_port_identity => {}
        _ => return,
    }
    s.stats.sync_count += 1;

    if sync.header.is_two_step() {
        s.pending_sync = Some((sync.header.sequence_id, t2_ns));
    } else {
        // One-step master: the Sync itself carries the precise t1.
        let t1_ns = sync.origin_timestamp.to_ns();
        complete_measurement(&mut s, t1_ns, t2_ns);
    }
}

fn handle_follow_up(slave: &Arc<Mutex<SlaveState>>, follow_up: &FollowUp) {
    let mut s = slave.lock();
    match s.grandmaster {
        Some(gm) if gm == follow_up.header.source_port_identity => {}
        _ => return,
    }

    let t2_ns = match s.pending_sync.take() {
        Some((seq, t2)) if seq == follow_up.header.sequence_id => t2,
        other => {
            s.pending_sync = other;
            return;
        }
    };
    s.stats.follow_up_count += 1;

    let t1_ns = follow_up.precise_origin_timestamp.to_ns();
    complete_measurement(&mut s, t1_ns, t2_ns);
}

/// One completed Sync exchange: feed the servo and drive the state
/// machine.
fn complete_measurement(s: &mut SlaveState, t1_ns: i64, t2_ns: i64) {
    let raw_diff = t2_ns - t1_ns;
    s.last_sync_diff_ns = Some(raw_diff);

    let baseline = *s.baseline_ns.get_or_insert(raw_diff);
    let offset_ns = raw_diff - baseline;

    s.servo.update(offset_ns);
    s.stats.offset_ns = s.servo.offset_ns();
    s.stats.frequency_ppb = s.servo.frequency_ppb();
    s.stats.locked = s.servo.is_locked();

    if s.stats.state == PtpState::Uncalibrated
        && s.stats.sync_count >= MIN_SYNC_FOR_SLAVE
        && s.servo.is_locked()
    {
        s.stats.state = PtpState::Slave;
        info!(
            grandmaster = %s.stats.grandmaster_id.to_hex(),
            "ptp slave calibrated"
        );
    }

    if s.stats.sync_count % DELAY_REQ_INTERVAL == 0 {
        send_delay_req(s);
    }

    stats::update_status_line(&s.stats);
}

fn send_delay_req(s: &mut SlaveState) {
    let Some(socket) = &s.event_socket else {
        return;
    };
    s.delay_req_seq = s.delay_req_seq.wrapping_add(1);
    let req = DelayReq::new(s.local_port, s.delay_req_seq, s.stats.domain);

    let t3 = platform::wall_clock_ns();
    let dest = SocketAddrV4::new(PTP_MULTICAST_ADDR, PTP_EVENT_PORT);
    match socket.send_to(&req.to_bytes(), dest) {
        Ok(_) => s.pending_delay = Some((s.delay_req_seq, t3)),
        Err(e) => debug!(error = %e, "delay_req send failed"),
    }
}

/// Delay_Resp closes the end-to-end exchange. The epoch difference
/// cancels in ((t2 - t1) + (t4 - t3)) / 2, so the mean path delay is
/// usable even on a free-running local clock.
fn handle_delay_resp(slave: &Arc<Mutex<SlaveState>>, resp: &DelayResp) {
    let mut s = slave.lock();
    if resp.requesting_port_identity != s.local_port {
        return;
    }

    let t3_ns = match s.pending_delay.take() {
        Some((seq, t3)) if seq == resp.header.sequence_id => t3,
        other => {
            s.pending_delay = other;
            return;
        }
    };
    s.stats.delay_resp_count += 1;

    if let Some(sync_diff) = s.last_sync_diff_ns {
        let t4_ns = resp.receive_timestamp.to_ns();
        let path = (sync_diff + (t4_ns - t3_ns)) / 2;
        s.stats.mean_path_delay_ns = path.max(0);
    }

    stats::update_status_line(&s.stats);
}
