use std::fs::File;
use std::io::{prelude::*, BufWriter, Cursor};
use std::path::{Path, PathBuf};

use crate::{
    compression::{should_compress, Compression},
    header::{QonvoHeader, HEADER_SIZE},
    path::EntryName,
    record::EntryRecord,
    ser::Serialize,
};

/// An entry queued for writing, with its compression decision already made.
#[derive(Debug)]
struct PreparedEntry {
    name: EntryName,
    data: Vec<u8>,
    compression: Compression,
}

/// Writes a complete container in one shot: queue entries with [`insert`],
/// then lay out header, TOC and data bodies with [`finish`].
///
/// Layout is only computed at finish time because every TOC record's offset
/// depends on the sizes of all stored entries before it.
///
/// [`insert`]: QonvoFileWriter::insert
/// [`finish`]: QonvoFileWriter::finish
#[derive(Debug)]
pub struct QonvoFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    entries: Vec<PreparedEntry>,
    finished: bool,
}

impl Drop for QonvoFileWriter {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "QonvoFileWriter dropped without calling finish(). \
                 Container at {:?} may be incomplete.",
                self.path
            );
        }
    }
}

impl QonvoFileWriter {
    /// Creates a new container file at `path`, truncating anything already
    /// there. Callers wanting atomicity write to a sibling temp path and
    /// rename over the final path once `finish` returns.
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<QonvoFileWriter> {
        let file = File::create(path.as_ref())?;

        Ok(QonvoFileWriter {
            file: BufWriter::new(file),
            path: path.as_ref().to_path_buf(),
            entries: Vec::new(),
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name.as_str() == name)
    }

    /// Queues one entry. Media and archive extensions are stored raw;
    /// everything else is deflated, but only kept compressed when that
    /// saves at least 10% over the raw bytes.
    pub fn insert(&mut self, name: EntryName, raw: Vec<u8>) -> std::io::Result<()> {
        if self.contains(name.as_str()) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "entry name already present",
            ));
        }

        let (data, compression) = if should_compress(name.as_str()) {
            let mut compressed = Vec::new();
            Compression::Deflate.compress(Cursor::new(&mut compressed), &mut &raw[..])?;

            if (compressed.len() as u64) * 10 < (raw.len() as u64) * 9 {
                (compressed, Compression::Deflate)
            } else {
                (raw, Compression::Stored)
            }
        } else {
            (raw, Compression::Stored)
        };

        self.entries.push(PreparedEntry {
            name,
            data,
            compression,
        });

        Ok(())
    }

    /// Writes header, TOC and data bodies, flushes, and returns the total
    /// number of bytes in the finished container.
    pub fn finish(mut self) -> std::io::Result<u64> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> std::io::Result<u64> {
        let mut records = Vec::with_capacity(self.entries.len());
        let mut toc_size = 0u64;
        for entry in &self.entries {
            let record = EntryRecord {
                name: entry.name.clone(),
                offset: 0,
                size: entry.data.len() as u64,
                compression: entry.compression,
            };
            toc_size += record.toc_len();
            records.push(record);
        }

        let data_offset = HEADER_SIZE as u64 + toc_size;
        let mut offset = data_offset;
        for record in records.iter_mut() {
            record.offset = offset;
            offset += record.size;
        }

        let header = QonvoHeader::new(records.len() as u32, data_offset);
        header.write(&mut self.file)?;

        for record in &records {
            record.write(&mut self.file)?;
        }

        for entry in &self.entries {
            self.file.write_all(&entry.data)?;
        }

        self.file.flush()?;
        self.finished = true;

        tracing::info!(
            entries = records.len(),
            bytes = offset,
            path = %self.path.display(),
            "container written"
        );

        Ok(offset)
    }
}
