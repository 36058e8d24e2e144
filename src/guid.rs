use std::fmt::{self, Debug, Display, Write};
use std::io;

use crate::ReadSeek;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// A windows GUID in its native little-endian field layout.
#[derive(PartialOrd, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Guid {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub const ZERO: Guid = Guid::new(0, 0, 0, [0; 8]);

    /// The first 32 bits of the GUID, used as the cheap hash contribution in
    /// the dispatch table (GUIDs are effectively random in their low bits).
    pub fn data1(&self) -> u32 {
        self.data1
    }

    pub fn from_stream<T: ReadSeek>(stream: &mut T) -> io::Result<Guid> {
        let data1 = stream.read_u32::<LittleEndian>()?;
        let data2 = stream.read_u16::<LittleEndian>()?;
        let data3 = stream.read_u16::<LittleEndian>()?;
        let mut data4 = [0; 8];
        stream.read_exact(&mut data4)?;
        Ok(Guid::new(data1, data2, data3, data4))
    }

    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.data1)?;
        w.write_u16::<LittleEndian>(self.data2)?;
        w.write_u16::<LittleEndian>(self.data3)?;
        w.write_all(&self.data4)?;
        Ok(())
    }

    pub fn to_string(&self) -> String {
        // Using `format!` will extend the string multiple times,
        // but we know ahead of time how much space we need.
        let mut s = String::with_capacity(36);

        write!(
            &mut s,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
        .expect("writing to a preallocated buffer cannot fail");

        s
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_string())
    }
}
