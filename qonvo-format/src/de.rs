use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{
    compression::Compression,
    header::{QonvoHeader, FORMAT_VERSION, MAGIC_BYTES},
    path::EntryName,
    record::EntryRecord,
};

pub(crate) trait DeserializeOwned: Sized {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

impl DeserializeOwned for QonvoHeader {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut magic_bytes = [0u8; 5];
        reader.read_exact(&mut magic_bytes)?;

        if &magic_bytes != MAGIC_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("magic bytes invalid: {:02x?}", magic_bytes),
            ));
        }

        let version = reader.read_u8()?;
        if version > FORMAT_VERSION {
            tracing::warn!(
                version,
                supported = FORMAT_VERSION,
                "container version newer than supported, reading the fields we know"
            );
        }

        let flags = reader.read_u16::<LittleEndian>()?;
        let entry_count = reader.read_u32::<LittleEndian>()?;
        let data_offset = reader.read_u64::<LittleEndian>()?;
        reader.read_exact(&mut [0u8; 4])?; // skip reserved

        tracing::debug!(version, entry_count, data_offset, "deserialized QonvoHeader");

        Ok(QonvoHeader {
            magic_bytes,
            version,
            flags,
            entry_count,
            data_offset,
        })
    }
}

impl DeserializeOwned for EntryRecord {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let name_len = reader.read_u16::<LittleEndian>()?;
        let mut buf = vec![0u8; name_len as usize];
        reader.read_exact(&mut buf)?;
        let name = String::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let name = EntryName::new(&name).map_err(|e| e.as_io_error())?;

        let offset = reader.read_u64::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let flags = reader.read_u8()?;

        tracing::debug!(%name, offset, size, flags, "deserialized EntryRecord");

        Ok(EntryRecord {
            name,
            offset,
            size,
            compression: Compression::from_flags(flags),
        })
    }
}
