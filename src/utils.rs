use std::char::decode_utf16;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use jiff::Timestamp;

use crate::err::{DeserializationError, DeserializationResult};

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;

/// Converts 100ns FILETIME ticks (since 1601-01-01) to a [`Timestamp`].
#[inline]
pub fn filetime_to_timestamp(filetime: i64) -> DeserializationResult<Timestamp> {
    let secs = filetime.div_euclid(10_000_000) - WINDOWS_TO_UNIX_SECS;
    let nanos = (filetime.rem_euclid(10_000_000) * 100) as i32;
    Timestamp::new(secs, nanos).map_err(|_| DeserializationError::InvalidDateTime)
}

/// Reads a null-terminated UTF-16LE string starting at `offset` in `payload`.
///
/// Classic kernel events carry names this way (file names, registry key
/// names). A missing terminator means the string runs to the end of the
/// payload, which rundown events produce in practice.
pub fn read_utf16_string_at(payload: &[u8], offset: usize) -> DeserializationResult<String> {
    let bytes = payload
        .get(offset..)
        .ok_or(DeserializationError::Truncated {
            what: "utf16 string",
            offset: offset as u64,
            need: 2,
            have: payload.len().saturating_sub(offset),
        })?;

    let mut units = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([chunk[0], chunk[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }

    decode_utf16(units.into_iter())
        .collect::<Result<String, _>>()
        .map_err(|_| DeserializationError::InvalidUtf16 {
            offset: offset as u64,
        })
}

/// Reads a pointer-sized (4 or 8 byte) little-endian value at `offset`,
/// widening 32-bit pointers to `u64`.
pub fn read_pointer_at(
    payload: &[u8],
    offset: usize,
    pointer_size: usize,
) -> DeserializationResult<u64> {
    let need = pointer_size;
    let bytes = payload
        .get(offset..offset + need)
        .ok_or(DeserializationError::Truncated {
            what: "pointer",
            offset: offset as u64,
            need,
            have: payload.len().saturating_sub(offset),
        })?;

    let mut cursor = Cursor::new(bytes);
    let value = match pointer_size {
        4 => u64::from(cursor.read_u32::<LittleEndian>()?),
        _ => cursor.read_u64::<LittleEndian>()?,
    };

    Ok(value)
}

pub fn read_u32_at(payload: &[u8], offset: usize) -> DeserializationResult<u32> {
    let bytes = payload
        .get(offset..offset + 4)
        .ok_or(DeserializationError::Truncated {
            what: "u32",
            offset: offset as u64,
            need: 4,
            have: payload.len().saturating_sub(offset),
        })?;

    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filetime_conversion_hits_the_unix_epoch() {
        // 1601-01-01 plus exactly the Windows-to-Unix gap.
        let ts = filetime_to_timestamp(WINDOWS_TO_UNIX_SECS * 10_000_000).unwrap();
        assert_eq!(ts.as_second(), 0);
    }

    #[test]
    fn test_reads_null_terminated_utf16() {
        let mut payload = vec![0xFF, 0xFF]; // leading field we skip over
        for unit in "C:\\pagefile.sys".encode_utf16() {
            payload.extend_from_slice(&unit.to_le_bytes());
        }
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&[0xAA, 0xBB]); // trailing garbage

        assert_eq!(read_utf16_string_at(&payload, 2).unwrap(), "C:\\pagefile.sys");
    }

    #[test]
    fn test_unterminated_utf16_runs_to_payload_end() {
        let mut payload = Vec::new();
        for unit in "HarddiskVolume2".encode_utf16() {
            payload.extend_from_slice(&unit.to_le_bytes());
        }

        assert_eq!(
            read_utf16_string_at(&payload, 0).unwrap(),
            "HarddiskVolume2"
        );
    }

    #[test]
    fn test_pointer_width_matters() {
        let payload = [0x78, 0x56, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE];

        assert_eq!(read_pointer_at(&payload, 0, 4).unwrap(), 0x1234_5678);
        assert_eq!(read_pointer_at(&payload, 0, 8).unwrap(), 0xDEAD_BEEF_1234_5678);
        assert!(read_pointer_at(&payload, 4, 8).is_err());
    }
}
