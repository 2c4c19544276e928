use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{header::QonvoHeader, record::EntryRecord};

pub(crate) trait Serialize {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

impl Serialize for QonvoHeader {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.magic_bytes)?;
        writer.write_u8(self.version)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        writer.write_u64::<LittleEndian>(self.data_offset)?;
        writer.write_all(&[0u8; 4]) // reserved
    }
}

impl Serialize for EntryRecord {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let name = self.name.as_str().as_bytes();

        writer.write_u16::<LittleEndian>(name.len() as u16)?;
        writer.write_all(name)?;
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u8(self.compression.flags())
    }
}
