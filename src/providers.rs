//! Well-known kernel ("NT Kernel Logger") task GUIDs and opcodes.
//!
//! Classic kernel events are identified by these task GUIDs plus an opcode
//! byte; there are no manifest event IDs for them.

use crate::guid::Guid;

pub const PROCESS_TASK: Guid = Guid::new(
    0x3d6fa8d0,
    0xfe05,
    0x11d0,
    [0x9d, 0xda, 0x00, 0xc0, 0x4f, 0xd7, 0xba, 0x7c],
);

pub const THREAD_TASK: Guid = Guid::new(
    0x3d6fa8d1,
    0xfe05,
    0x11d0,
    [0x9d, 0xda, 0x00, 0xc0, 0x4f, 0xd7, 0xba, 0x7c],
);

pub const IMAGE_TASK: Guid = Guid::new(
    0x2cb15d1d,
    0x5fc1,
    0x11d2,
    [0xab, 0xe1, 0x00, 0xa0, 0xc9, 0x11, 0xf5, 0x18],
);

pub const FILE_IO_TASK: Guid = Guid::new(
    0x90cbdc39,
    0x4a3e,
    0x11d1,
    [0x84, 0xf4, 0x00, 0x00, 0xf8, 0x04, 0x64, 0xe3],
);

pub const REGISTRY_TASK: Guid = Guid::new(
    0xae53722e,
    0xc863,
    0x11d2,
    [0x86, 0x59, 0x00, 0xc0, 0x4f, 0xa3, 0x21, 0xa1],
);

pub const PERF_INFO_TASK: Guid = Guid::new(
    0xce1dbfb4,
    0x137e,
    0x4da6,
    [0x87, 0xb0, 0x3f, 0x59, 0xaa, 0x10, 0x2c, 0xbc],
);

pub mod thread_opcode {
    pub const START: u8 = 1;
    pub const END: u8 = 2;
    pub const DC_START: u8 = 3;
    pub const DC_END: u8 = 4;
    pub const CSWITCH: u8 = 36;
}

pub mod file_io_opcode {
    pub const NAME: u8 = 0;
    pub const FILE_CREATE: u8 = 32;
    pub const FILE_DELETE: u8 = 35;
    pub const FILE_RUNDOWN: u8 = 36;
}

pub mod registry_opcode {
    pub const KCB_CREATE: u8 = 22;
    pub const KCB_DELETE: u8 = 23;
    pub const KCB_RUNDOWN_BEGIN: u8 = 24;
    pub const KCB_RUNDOWN_END: u8 = 25;
}

/// Name of a well-known kernel task, if we recognize the GUID. Used by the
/// unhandled-event path, which has nothing but the raw header to go on.
pub fn known_provider_name(guid: &Guid) -> Option<&'static str> {
    match *guid {
        g if g == PROCESS_TASK => Some("Process"),
        g if g == THREAD_TASK => Some("Thread"),
        g if g == IMAGE_TASK => Some("Image"),
        g if g == FILE_IO_TASK => Some("FileIo"),
        g if g == REGISTRY_TASK => Some("Registry"),
        g if g == PERF_INFO_TASK => Some("PerfInfo"),
        _ => None,
    }
}
