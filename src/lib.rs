//! A decoder layer for Windows kernel ETW trace events.
//!
//! Given a raw event record (a provider or task GUID, a small integer ID, a
//! version, header flags and an opaque payload), this crate routes the record
//! to the decoders registered for it and maintains the time-indexed
//! correlation state (thread→process, kernel-object-handle→name) that events
//! such as context switches and file I/O need to be interpreted.
//!
//! The two central pieces are [`HistoryTable`], a point-in-time associative
//! store, and [`DispatchTable`], an open-addressed hash table from
//! (GUID, ID) to decoder chains that understands both the modern
//! (provider GUID + event ID) and the legacy "classic" (task GUID + opcode)
//! identification schemes.
//!
//! Everything is single-threaded by design; see [`correlate`] for the
//! shared-state conventions.

pub mod correlate;
pub mod dispatch;
pub mod err;
pub mod guid;
pub mod history;
pub mod providers;
pub mod record;
pub mod utils;

pub use crate::correlate::{ContextSwitch, TraceState, register_kernel_decoders};
pub use crate::dispatch::{
    Addressing, DecoderSource, DispatchOutcome, DispatchTable, EventContext, EventDecoder,
    Template,
};
pub use crate::guid::Guid;
pub use crate::history::{HistoryEntry, HistoryTable, HistoryValue};
pub use crate::record::{HeaderFlags, RawEvent};

use std::io::{self, Read, Seek};

/// A map used in hot paths; `hashbrown` with `ahash` beats the default
/// SipHash tables for the small integer keys we deal with.
pub type FastMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;

/// Monotonically increasing position of an event within the processed stream.
pub type EventIndex = u64;

pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}
