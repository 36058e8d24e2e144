use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};

use crate::FastMap;
use crate::ReadSeek;
use crate::err::{DeserializationError, DeserializationResult};

/// Newest persisted block format; bump when appending fields after the
/// entry list so old readers can still skip to the end-of-block marker.
const FORMAT_VERSION: u32 = 1;

/// The smallest possible serialized entry (key + timestamp, empty value).
const MIN_ENTRY_SIZE: u64 = 16;

/// One point-in-time fact: `value` was the meaning of `key` from
/// `valid_from` until superseded by a later entry for the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry<V> {
    pub key: u64,
    /// 100ns ticks since 1601-01-01 (FILETIME).
    pub valid_from: i64,
    pub value: V,
}

/// A point-in-time associative store.
///
/// Facts are appended as the event stream is processed and never edited in
/// place; a query asks "what was true about `key` as of time `t`" and gets
/// the newest fact recorded at or before `t`. Insertion is assumed to be in
/// time order per key (that is how a live stream arrives), which keeps every
/// per-key position run sorted and makes lookups a binary search.
///
/// Traces routinely record hundreds of thousands of facts (one per thread
/// start, one per file-object name announcement), so both `add` and `get`
/// have to stay cheap.
#[derive(Debug, Default)]
pub struct HistoryTable<V> {
    entries: Vec<HistoryEntry<V>>,
    index: FastMap<u64, Vec<u32>>,
}

impl<V> HistoryTable<V> {
    pub fn new() -> Self {
        HistoryTable {
            entries: Vec::new(),
            index: FastMap::default(),
        }
    }

    /// Appends a new fact for `key`.
    ///
    /// Soft precondition: `valid_from` is at or after any timestamp already
    /// recorded for this key. Violations are not errors; the newest-inserted
    /// entry simply wins for queries at or after its timestamp.
    pub fn add(&mut self, key: u64, valid_from: i64, value: V) {
        trace!("history add key={key:#x} valid_from={valid_from}");

        let position = self.entries.len() as u32;
        self.entries.push(HistoryEntry {
            key,
            valid_from,
            value,
        });
        self.index.entry(key).or_default().push(position);
    }

    /// The newest fact for `key` with `valid_from <= timestamp`, or `None`
    /// if the key is unknown or every fact is later than the query time.
    /// A miss is not an error; callers substitute their own sentinel.
    pub fn get(&self, key: u64, timestamp: i64) -> Option<&V> {
        let run = self.index.get(&key)?;

        // `run` is sorted by valid_from (forward-only insertion), so find
        // the first entry strictly past the query time and step back one.
        let past = run.partition_point(|&pos| self.entries[pos as usize].valid_from <= timestamp);
        if past == 0 {
            return None;
        }

        Some(&self.entries[run[past - 1] as usize].value)
    }

    /// All recorded facts, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry<V>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: HistoryValue> HistoryTable<V> {
    /// Persists the table as one versioned block:
    /// `version (u32) | end-of-block offset (u64) | count (u32) | entries`.
    ///
    /// The end-of-block offset is written as a placeholder first and patched
    /// once the entries are out, so readers of older library versions can
    /// skip fields a newer writer appended after the entry list.
    pub fn write_to<W: Write + Seek>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;

        let marker_pos = writer.stream_position()?;
        writer.write_u64::<LittleEndian>(0)?;

        writer.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in &self.entries {
            writer.write_u64::<LittleEndian>(entry.key)?;
            writer.write_i64::<LittleEndian>(entry.valid_from)?;
            entry.value.write_value(writer)?;
        }

        let end_pos = writer.stream_position()?;
        writer.seek(SeekFrom::Start(marker_pos))?;
        writer.write_u64::<LittleEndian>(end_pos)?;
        writer.seek(SeekFrom::Start(end_pos))?;

        debug!("history table persisted, {} entries", self.entries.len());
        Ok(())
    }

    /// Reads back a block written by [`HistoryTable::write_to`], rebuilding
    /// the per-key index. Corrupt structure (unknown newer version, entry
    /// count that cannot fit the stream) aborts the whole load.
    pub fn read_from<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self> {
        let version = reader.read_u32::<LittleEndian>()?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(DeserializationError::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let end_offset = reader.read_u64::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;

        let payload_start = reader.tell()?;
        if end_offset < payload_start {
            return Err(DeserializationError::InvalidEndMarker { end_offset });
        }
        let remaining = end_offset - payload_start;
        if u64::from(count) * MIN_ENTRY_SIZE > remaining {
            return Err(DeserializationError::ImplausibleEntryCount { count, remaining });
        }

        let mut table = HistoryTable::new();
        for _ in 0..count {
            let key = reader.read_u64::<LittleEndian>()?;
            let valid_from = reader.read_i64::<LittleEndian>()?;
            let value = V::read_value(reader)?;
            table.add(key, valid_from, value);
        }

        // Fields appended by newer writers live between here and the end
        // marker; skip them rather than assuming a fixed record size.
        reader.seek(SeekFrom::Start(end_offset))?;

        debug!("history table restored, {} entries", table.len());
        Ok(table)
    }
}

/// Encoding of one history value inside a persisted block.
pub trait HistoryValue: Sized {
    fn write_value<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
    fn read_value<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self>;
}

impl HistoryValue for u32 {
    fn write_value<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(*self)
    }

    fn read_value<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl HistoryValue for u64 {
    fn write_value<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(*self)
    }

    fn read_value<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl HistoryValue for String {
    fn write_value<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.len() as u32)?;
        writer.write_all(self.as_bytes())
    }

    fn read_value<R: ReadSeek>(reader: &mut R) -> DeserializationResult<Self> {
        let offset = reader.tell()?;
        let len = reader.read_u32::<LittleEndian>()?;
        let mut bytes = vec![0_u8; len as usize];
        reader.read_exact(&mut bytes)?;

        String::from_utf8(bytes).map_err(|_| DeserializationError::InvalidUtf8 { offset })
    }
}
