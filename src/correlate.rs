//! Correlation decoders: the glue between the dispatch table and the
//! history tables.
//!
//! Some kernel events only announce a fact (a thread started under a
//! process, a file object got a name); other events carry nothing but the
//! announced key (a context switch names threads, file I/O names objects)
//! and must be resolved against whoever owned that key *at the time the
//! event occurred*. The announcing decoders write into a [`HistoryTable`],
//! the consuming decoders read from it with the event's own timestamp.
//!
//! Processing is single-threaded (one blocking dispatch per record), so the
//! tables are shared between decoders by `Rc<RefCell<…>>` handles rather
//! than locks or a string-keyed bag.

use std::cell::RefCell;
use std::io::{Seek, Write};
use std::rc::Rc;

use log::warn;

use crate::EventIndex;
use crate::ReadSeek;
use crate::dispatch::{DispatchTable, EventContext, EventDecoder, Template};
use crate::err::{DeserializationResult, Result};
use crate::history::HistoryTable;
use crate::providers::{
    FILE_IO_TASK, REGISTRY_TASK, THREAD_TASK, file_io_opcode, registry_opcode, thread_opcode,
};
use crate::utils::{read_pointer_at, read_u32_at, read_utf16_string_at};

/// The cross-event correlation state of one trace session.
///
/// One instance per event source, created alongside the dispatch table and
/// living for the whole drain. Both tables can be persisted and restored so
/// state carries across a save/reload of a long-running session.
#[derive(Debug, Default)]
pub struct TraceState {
    /// thread ID → owning process ID over time.
    pub threads: Rc<RefCell<HistoryTable<u32>>>,
    /// kernel object handle (file object, registry KCB) → name over time.
    pub object_names: Rc<RefCell<HistoryTable<String>>>,
}

impl TraceState {
    pub fn new() -> Self {
        TraceState::default()
    }

    /// The process that owned `thread_id` at `timestamp`, if any thread
    /// start was recorded by then. A miss means "unknown process", not an
    /// error.
    pub fn resolve_process(&self, thread_id: u32, timestamp: i64) -> Option<u32> {
        self.threads
            .borrow()
            .get(u64::from(thread_id), timestamp)
            .copied()
    }

    /// The name announced for `handle` as of `timestamp`, if any.
    pub fn resolve_name(&self, handle: u64, timestamp: i64) -> Option<String> {
        self.object_names.borrow().get(handle, timestamp).cloned()
    }

    /// Persists both tables back to back, each as its own versioned block.
    pub fn save_to<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        self.threads.borrow().write_to(writer)?;
        self.object_names.borrow().write_to(writer)?;
        Ok(())
    }

    /// Restores state written by [`TraceState::save_to`]. Corruption in
    /// either block aborts the whole load.
    pub fn load_from<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self> {
        let threads = HistoryTable::read_from(reader)?;
        let object_names = HistoryTable::read_from(reader)?;
        Ok(TraceState {
            threads: Rc::new(RefCell::new(threads)),
            object_names: Rc::new(RefCell::new(object_names)),
        })
    }
}

/// One resolved context switch, handed to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSwitch {
    /// 100ns FILETIME ticks.
    pub timestamp: i64,
    pub event_index: EventIndex,
    pub new_thread: u32,
    /// `None` when no thread start was recorded for the thread by this time.
    pub new_process: Option<u32>,
    pub old_thread: u32,
    pub old_process: Option<u32>,
}

/// Writes `(thread ID, timestamp, process ID)` facts from thread start and
/// DC-start events. Payload layout (Thread TypeGroup1, v2+):
/// `ProcessId u32 | TThreadId u32 | …stack fields we don't need`.
pub struct ThreadStartDecoder {
    threads: Rc<RefCell<HistoryTable<u32>>>,
}

impl ThreadStartDecoder {
    pub fn new(threads: Rc<RefCell<HistoryTable<u32>>>) -> Self {
        ThreadStartDecoder { threads }
    }
}

impl EventDecoder for ThreadStartDecoder {
    fn handle(&mut self, event: &EventContext<'_>) {
        let payload = event.payload();
        let (Ok(process_id), Ok(thread_id)) = (read_u32_at(payload, 0), read_u32_at(payload, 4))
        else {
            warn!(
                "thread start payload too short ({} bytes), event {} skipped",
                payload.len(),
                event.event_index()
            );
            return;
        };

        self.threads
            .borrow_mut()
            .add(u64::from(thread_id), event.raw_timestamp(), process_id);
    }
}

/// Resolves both sides of a context switch against thread history and hands
/// the result to the caller. Payload layout (CSwitch, v2+):
/// `NewThreadId u32 | OldThreadId u32 | priorities/wait fields we don't need`.
pub struct ContextSwitchDecoder {
    threads: Rc<RefCell<HistoryTable<u32>>>,
    on_switch: Box<dyn FnMut(ContextSwitch)>,
}

impl ContextSwitchDecoder {
    pub fn new(
        threads: Rc<RefCell<HistoryTable<u32>>>,
        on_switch: Box<dyn FnMut(ContextSwitch)>,
    ) -> Self {
        ContextSwitchDecoder { threads, on_switch }
    }
}

impl EventDecoder for ContextSwitchDecoder {
    fn handle(&mut self, event: &EventContext<'_>) {
        let payload = event.payload();
        let (Ok(new_thread), Ok(old_thread)) = (read_u32_at(payload, 0), read_u32_at(payload, 4))
        else {
            warn!(
                "cswitch payload too short ({} bytes), event {} skipped",
                payload.len(),
                event.event_index()
            );
            return;
        };

        let timestamp = event.raw_timestamp();
        let threads = self.threads.borrow();
        let switch = ContextSwitch {
            timestamp,
            event_index: event.event_index(),
            new_thread,
            new_process: threads.get(u64::from(new_thread), timestamp).copied(),
            old_thread,
            old_process: threads.get(u64::from(old_thread), timestamp).copied(),
        };
        drop(threads);

        (self.on_switch)(switch);
    }
}

/// Writes `(file object, timestamp, file name)` facts from FileIo name
/// events. Payload layout: `FileObject pointer-sized | FileName UTF-16`.
pub struct FileNameDecoder {
    object_names: Rc<RefCell<HistoryTable<String>>>,
}

impl FileNameDecoder {
    pub fn new(object_names: Rc<RefCell<HistoryTable<String>>>) -> Self {
        FileNameDecoder { object_names }
    }
}

impl EventDecoder for FileNameDecoder {
    fn handle(&mut self, event: &EventContext<'_>) {
        let payload = event.payload();
        let pointer_size = event.pointer_size();

        let (Ok(object), Ok(name)) = (
            read_pointer_at(payload, 0, pointer_size),
            read_utf16_string_at(payload, pointer_size),
        ) else {
            warn!(
                "file name payload too short ({} bytes), event {} skipped",
                payload.len(),
                event.event_index()
            );
            return;
        };

        self.object_names
            .borrow_mut()
            .add(object, event.raw_timestamp(), name);
    }
}

/// Writes `(KCB handle, timestamp, key name)` facts from registry KCB
/// events. Payload layout (Registry TypeGroup1, v2):
/// `InitialTime i64 | Status u32 | Index u32 | KeyHandle pointer-sized |
/// KeyName UTF-16`.
pub struct RegistryNameDecoder {
    object_names: Rc<RefCell<HistoryTable<String>>>,
}

impl RegistryNameDecoder {
    pub fn new(object_names: Rc<RefCell<HistoryTable<String>>>) -> Self {
        RegistryNameDecoder { object_names }
    }
}

impl EventDecoder for RegistryNameDecoder {
    fn handle(&mut self, event: &EventContext<'_>) {
        let payload = event.payload();
        let pointer_size = event.pointer_size();

        let (Ok(handle), Ok(name)) = (
            read_pointer_at(payload, 16, pointer_size),
            read_utf16_string_at(payload, 16 + pointer_size),
        ) else {
            warn!(
                "registry KCB payload too short ({} bytes), event {} skipped",
                payload.len(),
                event.event_index()
            );
            return;
        };

        self.object_names
            .borrow_mut()
            .add(handle, event.raw_timestamp(), name);
    }
}

/// Registers every standard kernel correlation decoder.
///
/// The set of kernel event kinds is static, so this is a plain list of
/// registration calls. Start and DC-start are separate registrations for the
/// same decoder logic (the task historically emits both forms).
pub fn register_kernel_decoders(
    table: &mut DispatchTable,
    state: &TraceState,
    on_switch: Box<dyn FnMut(ContextSwitch)>,
) {
    for opcode in [thread_opcode::START, thread_opcode::DC_START] {
        table.register(Template::classic(
            THREAD_TASK,
            opcode,
            Box::new(ThreadStartDecoder::new(Rc::clone(&state.threads))),
        ));
    }

    table.register(Template::classic(
        THREAD_TASK,
        thread_opcode::CSWITCH,
        Box::new(ContextSwitchDecoder::new(
            Rc::clone(&state.threads),
            on_switch,
        )),
    ));

    for opcode in [
        file_io_opcode::NAME,
        file_io_opcode::FILE_CREATE,
        file_io_opcode::FILE_DELETE,
        file_io_opcode::FILE_RUNDOWN,
    ] {
        table.register(Template::classic(
            FILE_IO_TASK,
            opcode,
            Box::new(FileNameDecoder::new(Rc::clone(&state.object_names))),
        ));
    }

    for opcode in [
        registry_opcode::KCB_CREATE,
        registry_opcode::KCB_RUNDOWN_BEGIN,
        registry_opcode::KCB_RUNDOWN_END,
    ] {
        table.register(Template::classic(
            REGISTRY_TASK,
            opcode,
            Box::new(RegistryNameDecoder::new(Rc::clone(&state.object_names))),
        ));
    }
}
