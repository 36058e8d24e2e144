use jiff::Timestamp;
use log::{debug, trace};

use crate::EventIndex;
use crate::guid::Guid;
use crate::providers::known_provider_name;
use crate::record::RawEvent;

/// How a registration (and the raw records it matches) identifies events.
///
/// Modern, manifest-based providers key events by (provider GUID, event ID).
/// Classic (pre-manifest) providers carry no usable per-event ID; the GUID
/// field of the header is repurposed as a task GUID and the opcode byte
/// substitutes for the ID. Numerically identical pairs under the two schemes
/// are distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    Modern,
    Classic,
}

/// Where a registration came from. Dynamic (manifest-derived) registrations
/// take precedence over static ones for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderSource {
    Static,
    Dynamic,
}

/// One subscriber's registered interest in one (GUID, ID) pair.
pub struct Template {
    pub provider: Guid,
    pub task: Guid,
    pub event_id: u16,
    pub opcode: u8,
    pub addressing: Addressing,
    pub source: DecoderSource,
    pub decoder: Box<dyn EventDecoder>,
}

impl Template {
    pub fn modern(provider: Guid, event_id: u16, decoder: Box<dyn EventDecoder>) -> Template {
        Template {
            provider,
            task: Guid::ZERO,
            event_id,
            opcode: 0,
            addressing: Addressing::Modern,
            source: DecoderSource::Static,
            decoder,
        }
    }

    pub fn classic(task: Guid, opcode: u8, decoder: Box<dyn EventDecoder>) -> Template {
        Template {
            provider: Guid::ZERO,
            task,
            event_id: 0,
            opcode,
            addressing: Addressing::Classic,
            source: DecoderSource::Static,
            decoder,
        }
    }

    pub fn with_source(mut self, source: DecoderSource) -> Template {
        self.source = source;
        self
    }

    fn key(&self) -> SlotKey {
        match self.addressing {
            Addressing::Modern => SlotKey {
                guid: self.provider,
                id: self.event_id,
                addressing: Addressing::Modern,
            },
            Addressing::Classic => SlotKey {
                guid: self.task,
                id: u16::from(self.opcode),
                addressing: Addressing::Classic,
            },
        }
    }
}

/// The logical key of a table slot. Two keys with identical GUID/ID bits but
/// different addressing never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotKey {
    guid: Guid,
    id: u16,
    addressing: Addressing,
}

impl SlotKey {
    fn for_record(raw: &RawEvent) -> SlotKey {
        if raw.is_classic() {
            // Classic records either leave the ID zeroed or mirror the
            // opcode into it; anything else is a producer bug.
            debug_assert!(
                raw.event_id == 0 || raw.event_id == u16::from(raw.opcode),
                "classic record with a conflicting event id: {} vs opcode {}",
                raw.event_id,
                raw.opcode
            );
            SlotKey {
                guid: raw.task(),
                id: u16::from(raw.opcode),
                addressing: Addressing::Classic,
            }
        } else {
            SlotKey {
                guid: raw.provider,
                id: raw.event_id,
                addressing: Addressing::Modern,
            }
        }
    }

    /// First 32 bits of the GUID mixed with `id * 9`. GUIDs are effectively
    /// random in `data1`, so this spreads well despite being cheap.
    fn hash(&self) -> u32 {
        self.guid
            .data1()
            .wrapping_add(u32::from(self.id).wrapping_mul(9))
    }

    /// Secondary probe step. Always odd, so with a power-of-two table every
    /// slot is eventually visited.
    fn probe_step(&self) -> usize {
        usize::from(self.id) * 2 + 1
    }
}

/// The view of one raw event handed to every decoder in a matched chain.
///
/// Each chained decoder sees the identical record and sequence number. The
/// borrow ties the view to the dispatch call, so decoder state cannot retain
/// the payload past the callback; decoders that need persistence copy.
pub struct EventContext<'a> {
    raw: &'a RawEvent<'a>,
    event_index: EventIndex,
}

impl<'a> EventContext<'a> {
    pub fn raw(&self) -> &RawEvent<'a> {
        self.raw
    }

    /// Position of this event within the whole processed stream.
    pub fn event_index(&self) -> EventIndex {
        self.event_index
    }

    /// 100ns FILETIME ticks; the unit history tables are queried in.
    pub fn raw_timestamp(&self) -> i64 {
        self.raw.timestamp
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.raw.timestamp()
    }

    pub fn process_id(&self) -> u32 {
        self.raw.process_id
    }

    pub fn thread_id(&self) -> u32 {
        self.raw.thread_id
    }

    pub fn provider(&self) -> Guid {
        self.raw.provider
    }

    pub fn opcode(&self) -> u8 {
        self.raw.opcode
    }

    pub fn event_id(&self) -> u16 {
        self.raw.event_id
    }

    pub fn version(&self) -> u8 {
        self.raw.version
    }

    pub fn payload(&self) -> &'a [u8] {
        self.raw.payload
    }

    pub fn pointer_size(&self) -> usize {
        self.raw.pointer_size()
    }

    /// Human-readable provider/task name, recomputed from the raw header on
    /// every call so the unhandled path never shows a stale name.
    pub fn provider_name(&self) -> String {
        match known_provider_name(&self.raw.provider) {
            Some(name) => name.to_string(),
            None => self.raw.provider.to_string(),
        }
    }
}

/// A decoder registered in the dispatch table.
///
/// Decoders run on the single processing thread, one event at a time, and
/// must not keep any reference into the payload once `handle` returns.
pub trait EventDecoder {
    fn handle(&mut self, event: &EventContext<'_>);
}

/// What a dispatch call did with the record. Lookup never fails; unmatched
/// records are accounted for and routed to the unhandled sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled {
        event_index: EventIndex,
        decoders: usize,
    },
    Unhandled {
        event_index: EventIndex,
    },
}

struct TemplateEntry {
    template: Template,
    /// Next subscriber for the same key. Chains are intrusive indices into
    /// `templates`, so a rehash relocates slots without touching chains.
    next: Option<u32>,
}

const INITIAL_SLOTS: usize = 64;

/// Open-addressed hash table from (GUID, small integer ID) to decoder
/// chains, the per-event hot path of the whole crate.
///
/// The backing array length is always a power of two (mask indexing); a
/// registration that would push occupancy past 3/4 doubles the array and
/// reinserts every chain head. Lookup probes until it hits a match or an
/// empty slot; an empty slot means the key is absent.
pub struct DispatchTable {
    slots: Box<[Option<u32>]>,
    templates: Vec<TemplateEntry>,
    occupied: usize,
    next_event_index: EventIndex,
    unhandled_sink: Option<Box<dyn EventDecoder>>,
    unhandled_count: u64,
}

impl Default for DispatchTable {
    fn default() -> Self {
        DispatchTable::new()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        DispatchTable {
            slots: vec![None; INITIAL_SLOTS].into_boxed_slice(),
            templates: Vec::new(),
            occupied: 0,
            next_event_index: 0,
            unhandled_sink: None,
            unhandled_count: 0,
        }
    }

    /// Registers a template. A second registration for an already-present
    /// key chains rather than overwrites: static sources append in
    /// registration order, dynamic sources splice in ahead of the chain so
    /// manifest-derived decoders win over statically generated ones.
    pub fn register(&mut self, template: Template) {
        if (self.occupied + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }

        let key = template.key();
        let mask = self.slots.len() - 1;
        let mut slot = key.hash() as usize & mask;
        let step = key.probe_step();

        loop {
            match self.slots[slot] {
                None => {
                    let index = self.push_entry(template, None);
                    self.slots[slot] = Some(index);
                    self.occupied += 1;
                    trace!("registered {key:?} in slot {slot}");
                    return;
                }
                Some(head) if self.templates[head as usize].template.key() == key => {
                    match template.source {
                        DecoderSource::Dynamic => {
                            // Splices ahead of the chain; deliberate
                            // precedence rule, observable behavior only.
                            let index = self.push_entry(template, Some(head));
                            self.slots[slot] = Some(index);
                        }
                        DecoderSource::Static => {
                            let index = self.push_entry(template, None);
                            let mut tail = head as usize;
                            while let Some(next) = self.templates[tail].next {
                                tail = next as usize;
                            }
                            self.templates[tail].next = Some(index);
                        }
                    }
                    trace!("chained another registration for {key:?}");
                    return;
                }
                Some(_) => {
                    slot = (slot + step) & mask;
                }
            }
        }
    }

    /// Routes one raw record to the decoders registered for it.
    ///
    /// Every event, matched or not, consumes one sequence number. A matched
    /// record invokes the primary template and then every chained one, each
    /// seeing the same record and sequence number; an unmatched record goes
    /// to the unhandled sink (if any) and is never an error.
    pub fn dispatch(&mut self, raw: &RawEvent) -> DispatchOutcome {
        let event_index = self.next_event_index;
        self.next_event_index += 1;

        let key = SlotKey::for_record(raw);
        let mask = self.slots.len() - 1;
        let mut slot = key.hash() as usize & mask;
        let step = key.probe_step();
        let context = EventContext { raw, event_index };

        loop {
            match self.slots[slot] {
                None => break,
                Some(head) if self.templates[head as usize].template.key() == key => {
                    let mut cursor = Some(head);
                    let mut decoders = 0;
                    while let Some(index) = cursor {
                        let entry = &mut self.templates[index as usize];
                        cursor = entry.next;
                        entry.template.decoder.handle(&context);
                        decoders += 1;
                    }
                    return DispatchOutcome::Handled {
                        event_index,
                        decoders,
                    };
                }
                Some(_) => {
                    slot = (slot + step) & mask;
                }
            }
        }

        self.unhandled_count += 1;
        if let Some(sink) = &mut self.unhandled_sink {
            sink.handle(&context);
        }
        DispatchOutcome::Unhandled { event_index }
    }

    /// The shared sink every unmatched event reaches. It still sees all the
    /// generic header fields through [`EventContext`], so no event is
    /// silently dropped.
    pub fn set_unhandled_sink(&mut self, sink: Box<dyn EventDecoder>) {
        self.unhandled_sink = Some(sink);
    }

    /// Number of registered templates (chained registrations included).
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Events dispatched so far (matched or not).
    pub fn events_dispatched(&self) -> u64 {
        self.next_event_index
    }

    pub fn unhandled_count(&self) -> u64 {
        self.unhandled_count
    }

    fn push_entry(&mut self, template: Template, next: Option<u32>) -> u32 {
        let index = self.templates.len() as u32;
        self.templates.push(TemplateEntry { template, next });
        index
    }

    /// Doubles the slot array and reinserts every chain head. Hashes are
    /// recomputed, so reinsertion order does not matter; chains hang off
    /// their head by index and are untouched.
    fn grow(&mut self) {
        let new_len = self.slots.len() * 2;
        debug!(
            "dispatch table growing {} -> {new_len} slots ({} occupied)",
            self.slots.len(),
            self.occupied
        );

        let old_slots = std::mem::replace(
            &mut self.slots,
            vec![None; new_len].into_boxed_slice(),
        );
        let mask = new_len - 1;

        for head in old_slots.iter().flatten() {
            let key = self.templates[*head as usize].template.key();
            let mut slot = key.hash() as usize & mask;
            let step = key.probe_step();
            while self.slots[slot].is_some() {
                slot = (slot + step) & mask;
            }
            self.slots[slot] = Some(*head);
        }
    }
}
