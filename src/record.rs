use bitflags::bitflags;
use jiff::Timestamp;

use crate::guid::Guid;
use crate::utils::filetime_to_timestamp;

bitflags! {
    /// Flag bits of an ETW event header, matching `EVENT_HEADER_FLAG_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u16 {
        const EXTENDED_INFO   = 0x0001;
        const PRIVATE_SESSION = 0x0002;
        const STRING_ONLY     = 0x0004;
        const TRACE_MESSAGE   = 0x0008;
        const NO_CPUTIME      = 0x0010;
        const HEADER_32_BIT   = 0x0020;
        const HEADER_64_BIT   = 0x0040;
        const CLASSIC_HEADER  = 0x0100;
        const PROCESSOR_INDEX = 0x0200;
    }
}

/// A borrowed view of one raw event record as delivered by the event source.
///
/// The payload is only valid for the duration of one dispatch call; nothing
/// in this crate retains it past the decoder callbacks, and the lifetime
/// parameter keeps user decoders honest about that too.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent<'a> {
    /// Provider GUID for manifest-based events; task GUID for classic ones.
    pub provider: Guid,
    /// Manifest event ID; zero for classic events.
    pub event_id: u16,
    pub opcode: u8,
    pub version: u8,
    /// 100ns ticks since 1601-01-01 (FILETIME).
    pub timestamp: i64,
    pub process_id: u32,
    pub thread_id: u32,
    pub flags: HeaderFlags,
    pub payload: &'a [u8],
}

impl<'a> RawEvent<'a> {
    /// Whether this record uses the legacy per-event identification scheme
    /// (task GUID + opcode instead of provider GUID + event ID).
    pub fn is_classic(&self) -> bool {
        self.flags.contains(HeaderFlags::CLASSIC_HEADER)
    }

    /// Pointer width, in bytes, of the machine that produced the trace.
    /// Pointer-sized payload fields (file objects, key handles) depend on it.
    pub fn pointer_size(&self) -> usize {
        if self.flags.contains(HeaderFlags::HEADER_32_BIT) {
            4
        } else {
            8
        }
    }

    /// For classic records the GUID field of the header is the task GUID.
    pub fn task(&self) -> Guid {
        debug_assert!(self.is_classic());
        self.provider
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        filetime_to_timestamp(self.timestamp).ok()
    }

    /// A copy of this record with corrected process/thread IDs.
    ///
    /// Some kernel events carry the wrong IDs in their header (the payload
    /// knows better). Decoders that need the corrected value build a new
    /// view instead of patching the shared record in place, so chained
    /// decoders and the unhandled-event path always see the original.
    pub fn with_ids(&self, process_id: u32, thread_id: u32) -> RawEvent<'a> {
        RawEvent {
            process_id,
            thread_id,
            ..*self
        }
    }
}
