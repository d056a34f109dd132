//! Add-on callback tables exchanged with the host at load time.
//!
//! The host hands its function table to the plugin init export exactly
//! once; it is kept in a single-writer slot and read by the hot paths
//! without synchronization. Optional host capabilities are `Option`
//! function pointers, absent slots stay `None`.

use std::cell::Cell;
use std::ffi::c_void;
use std::sync::OnceLock;

use super::engine::*;

// Plugin entry "faces"
pub const AURAPLUGIN_INFO: DWORD = 0;
pub const AURAPLUGIN_CREATE: DWORD = 1;
pub const AURAPLUGIN_CREATEURL: DWORD = 2;

// RegisterPlugin modes
pub const PLUGIN_CONFIG_ADD: DWORD = 0;
pub const PLUGIN_CONFIG_REMOVE: DWORD = 1;

// Config callback flags
pub const AURACONFIG_SET: DWORD = 1;
pub const AURACONFIG_PTR: DWORD = 2;

/// Stream creation callback for URL schemes.
pub type StreamCreateUrlProc = unsafe extern "system" fn(
    url: *const i8,
    offset: DWORD,
    flags: DWORD,
    proc_: Option<DownloadProc>,
    user: *mut c_void,
) -> HSTREAM;

/// Config callback invoked by the host's set/get-config entry points.
pub type AuraConfigProc = unsafe extern "system" fn(
    option: DWORD,
    flags: DWORD,
    value: *mut c_void,
) -> BOOL;

/// Callbacks the add-on implements for each stream it creates. Every
/// slot is optional; `None` tells the host to use its own handling.
/// The tags / file-position / get-position / resume / flags / attribute
/// slots are reserved extension points this add-on does not implement.
#[repr(C)]
pub struct AddonFunctions {
    pub flags: DWORD,
    pub free: Option<unsafe extern "system" fn(inst: *mut c_void)>,
    pub get_length: Option<unsafe extern "system" fn(inst: *mut c_void, mode: DWORD) -> QWORD>,
    pub get_tags: Option<unsafe extern "system" fn(inst: *mut c_void, tags: DWORD) -> *const i8>,
    pub get_file_position:
        Option<unsafe extern "system" fn(inst: *mut c_void, mode: DWORD) -> QWORD>,
    pub get_info: Option<unsafe extern "system" fn(inst: *mut c_void, info: *mut AuraChannelInfo)>,
    pub can_set_position:
        Option<unsafe extern "system" fn(inst: *mut c_void, pos: QWORD, mode: DWORD) -> BOOL>,
    pub set_position:
        Option<unsafe extern "system" fn(inst: *mut c_void, pos: QWORD, mode: DWORD) -> QWORD>,
    pub get_position:
        Option<unsafe extern "system" fn(inst: *mut c_void, pos: QWORD, mode: DWORD) -> QWORD>,
    pub set_sync: Option<
        unsafe extern "system" fn(
            inst: *mut c_void,
            type_: DWORD,
            param: QWORD,
            proc_: SyncProc,
            user: *mut c_void,
        ) -> HSYNC,
    >,
    pub remove_sync: Option<unsafe extern "system" fn(inst: *mut c_void, sync: HSYNC)>,
    pub can_resume: Option<unsafe extern "system" fn(inst: *mut c_void) -> BOOL>,
    pub set_flags: Option<unsafe extern "system" fn(inst: *mut c_void, flags: DWORD) -> DWORD>,
    pub attribute: Option<
        unsafe extern "system" fn(inst: *mut c_void, attrib: DWORD, value: *mut f32, set: BOOL) -> BOOL,
    >,
    pub attribute_ex: Option<
        unsafe extern "system" fn(
            inst: *mut c_void,
            attrib: DWORD,
            value: *mut c_void,
            typesize: DWORD,
            set: BOOL,
        ) -> DWORD,
    >,
}

pub type TriggerSyncProc =
    unsafe extern "system" fn(handle: HSTREAM, sync: HSYNC, pos: QWORD, data: DWORD) -> BOOL;
pub type TriggerSyncsProc =
    unsafe extern "system" fn(handle: HSTREAM, type_: DWORD, pos: QWORD, data: DWORD) -> BOOL;

/// Sync trigger primitive. Older hosts trigger one sync handle at a
/// time, newer hosts trigger every sync of a type; the host version
/// reported at init decides which member is live.
#[repr(C)]
pub union TriggerSync {
    pub one: Option<TriggerSyncProc>,
    pub all: Option<TriggerSyncsProc>,
}

/// Function table provided by the host engine.
#[repr(C)]
pub struct HostFunctions {
    pub set_error: Option<unsafe extern "system" fn(error: i32)>,
    pub register_plugin: Option<unsafe extern "system" fn(proc_: *const c_void, mode: DWORD)>,
    pub create_stream: Option<
        unsafe extern "system" fn(
            freq: DWORD,
            chans: DWORD,
            flags: DWORD,
            proc_: StreamProc,
            inst: *mut c_void,
            funcs: *const AddonFunctions,
        ) -> HSTREAM,
    >,
    pub new_sync: Option<
        unsafe extern "system" fn(
            handle: HSTREAM,
            type_: DWORD,
            proc_: SyncProc,
            user: *mut c_void,
        ) -> HSYNC,
    >,
    pub trigger: TriggerSync,
    pub get_count: Option<unsafe extern "system" fn(handle: DWORD, output: BOOL) -> QWORD>,
    pub get_position:
        Option<unsafe extern "system" fn(handle: DWORD, count: QWORD, mode: DWORD) -> QWORD>,
    /// Pull decoded PCM bytes from any host channel (thread-safe per the
    /// host contract). Used by the TX pipeline.
    pub channel_get_data:
        Option<unsafe extern "system" fn(handle: DWORD, buffer: *mut c_void, length: DWORD) -> DWORD>,
    /// Query a host channel's format, used to validate TX configs.
    pub channel_get_info:
        Option<unsafe extern "system" fn(handle: DWORD, info: *mut AuraChannelInfo) -> BOOL>,
}

struct HostTable {
    funcs: *const HostFunctions,
    version: DWORD,
}

// The table is written once at plugin load, before any reader exists.
unsafe impl Send for HostTable {}
unsafe impl Sync for HostTable {}

static HOST: OnceLock<HostTable> = OnceLock::new();

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(AURA_OK) };
}

/// Store the host table at plugin load. Returns false when the host ABI
/// major/minor does not match what this add-on was built against.
///
/// # Safety
/// `funcs` must point to a table that outlives the plugin.
pub unsafe fn store_host(funcs: *const HostFunctions, host_version: DWORD) -> bool {
    if funcs.is_null() || (host_version >> 16) != AURA_ABI_VERSION {
        return false;
    }
    HOST.get_or_init(|| HostTable {
        funcs,
        version: host_version,
    });
    true
}

pub fn host_initialized() -> bool {
    HOST.get().is_some()
}

pub fn host_version() -> DWORD {
    HOST.get().map(|h| h.version).unwrap_or(0)
}

/// The host function table, if the plugin has been initialized.
pub fn host_funcs() -> Option<&'static HostFunctions> {
    HOST.get().map(|h| unsafe { &*h.funcs })
}

/// Record the per-thread error code and forward it to the host.
pub fn set_error(error: i32) {
    LAST_ERROR.with(|e| e.set(error));
    if let Some(funcs) = host_funcs() {
        if let Some(f) = funcs.set_error {
            unsafe { f(error) };
        }
    }
}

/// The error code most recently set on this thread.
pub fn last_error() -> i32 {
    LAST_ERROR.with(|e| e.get())
}

/// Register a sync with the host. Returns 0 when the host cannot.
pub fn new_sync(handle: HSTREAM, type_: DWORD, proc_: SyncProc, user: *mut c_void) -> HSYNC {
    match host_funcs().and_then(|f| f.new_sync) {
        Some(f) => unsafe { f(handle, type_, proc_, user) },
        None => 0,
    }
}

/// Fire all registered syncs of one type on a stream, using whichever
/// trigger primitive the host version provides.
pub fn trigger_syncs(
    channel: HSTREAM,
    sync_type: DWORD,
    handles: &[HSYNC],
    pos: QWORD,
    data: DWORD,
) {
    let Some(host) = HOST.get() else {
        return;
    };
    let funcs = unsafe { &*host.funcs };
    unsafe {
        if host.version >= AURA_ABI_TRIGGER_TYPED {
            if let Some(f) = funcs.trigger.all {
                f(channel, sync_type, pos, data);
            }
        } else if let Some(f) = funcs.trigger.one {
            for &h in handles {
                f(channel, h, pos, data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_local_error_is_per_thread() {
        set_error(AURA_ERROR_NOTAVAIL);
        assert_eq!(last_error(), AURA_ERROR_NOTAVAIL);

        std::thread::spawn(|| {
            assert_eq!(last_error(), AURA_OK);
            set_error(AURA_ERROR_MEM);
            assert_eq!(last_error(), AURA_ERROR_MEM);
        })
        .join()
        .unwrap();

        assert_eq!(last_error(), AURA_ERROR_NOTAVAIL);
    }
}
