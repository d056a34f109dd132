//! Aura engine ABI type definitions.
//! These mirror the host SDK header and must stay layout-stable.

use std::ffi::c_void;

// Basic types matching the host SDK definitions
pub type DWORD = u32;
pub type QWORD = u64;
pub type BOOL = i32;

// Handle types
pub type HSTREAM = DWORD;
pub type HSYNC = DWORD;
pub type HPLUGIN = DWORD;

pub const TRUE: BOOL = 1;
pub const FALSE: BOOL = 0;

// Host ABI version this add-on is built against (0xAABB = major.minor)
pub const AURA_ABI_VERSION: DWORD = 0x0204;
/// First host version whose sync trigger primitive is the typed
/// trigger-all variant instead of per-handle triggering.
pub const AURA_ABI_TRIGGER_TYPED: DWORD = 0x02041100;

// Error codes (host error space)
pub const AURA_OK: i32 = 0;
pub const AURA_ERROR_MEM: i32 = 1;
pub const AURA_ERROR_FILEOPEN: i32 = 2;
pub const AURA_ERROR_HANDLE: i32 = 5;
pub const AURA_ERROR_POSITION: i32 = 7;
pub const AURA_ERROR_INIT: i32 = 8;
pub const AURA_ERROR_ALREADY: i32 = 14;
pub const AURA_ERROR_ILLPARAM: i32 = 19;
pub const AURA_ERROR_NOTAVAIL: i32 = 37;
pub const AURA_ERROR_VERSION: i32 = 43;
pub const AURA_ERROR_UNKNOWN: i32 = -1;
// Add-on specific: operation needs a disciplined clock
pub const AURA_ERROR_NO_CLOCK: i32 = 0x2000;

// Sample format flags
pub const AURA_SAMPLE_8BITS: DWORD = 1;
pub const AURA_SAMPLE_FLOAT: DWORD = 0x100;
pub const AURA_SAMPLE_24BITS: DWORD = 0x200;
pub const AURA_SAMPLE_LOOP: DWORD = 4;

pub const AURA_STREAM_DECODE: DWORD = 0x200000;
pub const AURA_STREAM_AUTOFREE: DWORD = 0x40000;

// STREAMPROC return flag marking end of stream
pub const AURA_STREAMPROC_END: DWORD = 0x80000000;

// Position modes
pub const AURA_POS_BYTE: DWORD = 0;

// Channel types
pub const AURA_CTYPE_STREAM: DWORD = 0x10000;
pub const AURA_CTYPE_STREAM_AES67: DWORD = 0x1f200;

// Sync types: the add-on's own space. Everything else is delegated back
// to the host with the -1 sentinel.
pub const AURA_SYNC_AES67_UNDERRUN: DWORD = 0x10000;
pub const AURA_SYNC_AES67_PACKET_LATE: DWORD = 0x10001;
pub const SYNC_TYPE_MASK: DWORD = 0x00ff_ffff;

/// Channel info filled by the add-on's get_info callback.
#[repr(C)]
pub struct AuraChannelInfo {
    pub freq: DWORD,
    pub chans: DWORD,
    pub flags: DWORD,
    pub ctype: DWORD,
    pub origres: DWORD,
    pub plugin: HPLUGIN,
    pub sample: DWORD,
    pub filename: *const i8,
}

/// One format entry advertised through the plugin info face.
#[repr(C)]
pub struct AuraPluginForm {
    pub ctype: DWORD,
    pub name: *const i8,
    pub exts: *const i8,
}

// Only pointers to static string data
unsafe impl Sync for AuraPluginForm {}

/// Plugin info returned for the INFO face.
#[repr(C)]
pub struct AuraPluginInfo {
    pub version: DWORD,
    pub formatc: DWORD,
    pub formats: *const AuraPluginForm,
}

unsafe impl Sync for AuraPluginInfo {}

/// Stream fill callback: write up to `length` bytes, OR the END flag in.
pub type StreamProc = unsafe extern "system" fn(
    handle: HSTREAM,
    buffer: *mut c_void,
    length: DWORD,
    user: *mut c_void,
) -> DWORD;

/// Sync callback invoked when a sync point triggers.
pub type SyncProc = unsafe extern "system" fn(
    handle: HSYNC,
    channel: DWORD,
    data: DWORD,
    user: *mut c_void,
);

/// Download callback for URL streams (unused by live AES67 streams).
pub type DownloadProc = unsafe extern "system" fn(
    buffer: *const c_void,
    length: DWORD,
    user: *mut c_void,
);
