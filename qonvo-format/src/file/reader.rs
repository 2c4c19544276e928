use std::fs::File;
use std::io::{prelude::*, BufReader, Cursor, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::{
    compression::Compression,
    de::DeserializeOwned,
    header::QonvoHeader,
    record::{EntryRecord, BOARD_ENTRY},
};

/// Chunk size for streaming stored entries to disk; bounds peak memory
/// regardless of attachment size.
const STREAM_CHUNK: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Invalid path to Qonvo file. Path: '{}'", .1.display())]
    InvalidPath(#[source] std::io::Error, PathBuf),

    #[error("Could not read header (the file is too short to be a Qonvo container).")]
    MissingHeader(#[source] std::io::Error),

    #[error("Magic bytes invalid. Is this a valid Qonvo container?")]
    BadMagic(#[source] std::io::Error),

    #[error(
        "Invalid table of contents (the index that describes where all the entries are is \
         truncated or corrupt)."
    )]
    InvalidToc(#[source] std::io::Error),

    #[error("Failed to read Qonvo file. Path: '{}'", .1.display())]
    ReadFailed(#[source] std::io::Error, PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Creating directory failed. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] std::io::Error, PathBuf),

    #[error("Creating file failed. Path: '{}'", .1.display())]
    CreateFileFailed(#[source] std::io::Error, PathBuf),

    #[error("Reading entry data failed. Entry: '{1}'")]
    ReadFailed(#[source] std::io::Error, String),

    #[error("Writing entry data failed. Path: '{}'", .1.display())]
    WriteFailed(#[source] std::io::Error, PathBuf),

    #[error("Decompressing entry failed. Entry: '{1}'")]
    DecompressionFailed(#[source] std::io::Error, String),

    #[error("Container has no `board.json` entry")]
    MissingBoardEntry,
}

/// Statistics from a streaming full extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStats {
    /// Number of payload entries written below the destination directory.
    pub entries_extracted: u64,
    /// Total stored (on-disk) bytes of those entries.
    pub bytes_extracted: u64,
}

/// The result of a streaming full extraction: the document entry in memory,
/// everything else on disk.
#[derive(Debug)]
pub struct ExtractedBoard {
    /// Decompressed bytes of the `board.json` entry.
    pub board: Vec<u8>,
    pub stats: ExtractStats,
}

#[derive(Debug)]
pub struct QonvoFileReader {
    file: File,
    path: PathBuf,
    header: QonvoHeader,
    toc: Vec<EntryRecord>,
}

impl QonvoFileReader {
    /// Opens an existing container and parses its header and TOC. Entry
    /// data is not touched until [`read_entry`] or [`extract_to_dir`].
    ///
    /// [`read_entry`]: QonvoFileReader::read_entry
    /// [`extract_to_dir`]: QonvoFileReader::extract_to_dir
    pub fn open<P: AsRef<Path>>(path: P) -> Result<QonvoFileReader, OpenError> {
        let path = path
            .as_ref()
            .canonicalize()
            .map_err(|e| OpenError::InvalidPath(e, path.as_ref().to_path_buf()))?;

        let mut file = File::open(&path).map_err(|e| OpenError::ReadFailed(e, path.clone()))?;

        let (header, toc) = {
            let mut reader = BufReader::new(&mut file);

            let header =
                QonvoHeader::deserialize_owned(&mut reader).map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => OpenError::MissingHeader(e),
                    std::io::ErrorKind::InvalidData => OpenError::BadMagic(e),
                    _ => OpenError::ReadFailed(e, path.clone()),
                })?;

            // Cap the preallocation: a corrupt entry count must not be able
            // to reserve gigabytes before the parse fails.
            let mut toc = Vec::with_capacity(header.entry_count.min(1024) as usize);
            for _ in 0..header.entry_count {
                toc.push(
                    EntryRecord::deserialize_owned(&mut reader).map_err(OpenError::InvalidToc)?,
                );
            }

            (header, toc)
        };

        Ok(QonvoFileReader {
            file,
            path,
            header,
            toc,
        })
    }

    #[inline(always)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline(always)]
    pub fn version(&self) -> u8 {
        self.header.version
    }

    #[inline(always)]
    pub fn entries(&self) -> &[EntryRecord] {
        &self.toc
    }

    #[inline(always)]
    pub fn find(&self, name: &str) -> Option<&EntryRecord> {
        self.toc.iter().find(|r| r.name.as_str() == name)
    }

    /// Random access: reads and decompresses a single named entry, or
    /// `None` when the container has no such entry.
    pub fn read_entry(&self, name: &str) -> std::io::Result<Option<Vec<u8>>> {
        let record = match self.find(name) {
            Some(record) => record,
            None => return Ok(None),
        };

        if record.size == 0 {
            return Ok(Some(Vec::new()));
        }

        let mmap = unsafe { self.memory_map(record)? };
        let mut out = Vec::new();
        record
            .compression
            .decompress_write(Cursor::new(&mmap[..]), &mut out)?;

        Ok(Some(out))
    }

    /// Reads the raw stored bytes of an entry, without decompressing.
    pub fn read_bytes(&self, record: &EntryRecord) -> std::io::Result<std::io::Take<File>> {
        let mut file = File::open(&self.path)?;

        file.seek(SeekFrom::Start(record.offset))?;
        Ok(file.take(record.size))
    }

    /// # Safety
    ///
    /// The mapped region is only valid while the underlying file is not
    /// truncated or replaced by another process.
    pub unsafe fn memory_map(&self, record: &EntryRecord) -> std::io::Result<memmap2::Mmap> {
        MmapOptions::new()
            .offset(record.offset)
            .len(record.size as usize)
            .map(&self.file)
    }

    /// Streaming full extraction. The `board.json` entry is read fully into
    /// memory and returned; every `attachments/` and `repositories/` entry
    /// is streamed to a file under `dest`, creating parent directories as
    /// needed. Other entry names are skipped.
    ///
    /// Compressed payloads are read fully before decompression (deflate
    /// offers no chunked streaming decode here); stored payloads are copied
    /// in 256 KiB chunks so peak memory stays bounded.
    pub fn extract_to_dir<P: AsRef<Path>>(&self, dest: P) -> Result<ExtractedBoard, ExtractError> {
        let dest = dest.as_ref();
        let mut file = File::open(&self.path)
            .map_err(|e| ExtractError::ReadFailed(e, self.path.display().to_string()))?;

        let mut board: Option<Vec<u8>> = None;
        let mut stats = ExtractStats::default();

        for record in &self.toc {
            if record.name.as_str() == BOARD_ENTRY {
                board = Some(self.read_record_to_memory(&mut file, record)?);
            } else if record.is_payload() {
                self.extract_record(&mut file, record, dest)?;
                stats.entries_extracted += 1;
                stats.bytes_extracted += record.size;
            } else {
                tracing::debug!(name = %record.name, "skipping entry outside payload namespaces");
            }
        }

        let board = board.ok_or(ExtractError::MissingBoardEntry)?;

        tracing::info!(
            entries = stats.entries_extracted,
            bytes = stats.bytes_extracted,
            dest = %dest.display(),
            "streamed payload entries"
        );

        Ok(ExtractedBoard { board, stats })
    }

    fn read_record_to_memory(
        &self,
        file: &mut File,
        record: &EntryRecord,
    ) -> Result<Vec<u8>, ExtractError> {
        let name = record.name.as_str();
        let stored = read_stored(file, record).map_err(|e| ExtractError::ReadFailed(e, name.to_string()))?;

        match record.compression {
            Compression::Stored => Ok(stored),
            Compression::Deflate => {
                let mut out = Vec::new();
                record
                    .compression
                    .decompress_write(Cursor::new(stored), &mut out)
                    .map_err(|e| ExtractError::DecompressionFailed(e, name.to_string()))?;
                Ok(out)
            }
        }
    }

    fn extract_record(
        &self,
        file: &mut File,
        record: &EntryRecord,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let out_path = dest.join(record.name.as_str());
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExtractError::CreateDirFailed(e, parent.to_path_buf()))?;
        }

        let out = File::create(&out_path)
            .map_err(|e| ExtractError::CreateFileFailed(e, out_path.clone()))?;
        let mut out = std::io::BufWriter::new(out);

        match record.compression {
            Compression::Deflate => {
                let stored = read_stored(file, record)
                    .map_err(|e| ExtractError::ReadFailed(e, record.name.as_str().to_string()))?;
                record
                    .compression
                    .decompress_write(Cursor::new(stored), &mut out)
                    .map_err(|e| {
                        ExtractError::DecompressionFailed(e, record.name.as_str().to_string())
                    })?;
            }
            Compression::Stored => {
                file.seek(SeekFrom::Start(record.offset))
                    .map_err(|e| ExtractError::ReadFailed(e, record.name.as_str().to_string()))?;
                let copied = copy_chunked(&mut file.take(record.size), &mut out)
                    .map_err(|e| ExtractError::WriteFailed(e, out_path.clone()))?;
                if copied < record.size {
                    return Err(ExtractError::ReadFailed(
                        std::io::ErrorKind::UnexpectedEof.into(),
                        record.name.as_str().to_string(),
                    ));
                }
            }
        }

        out.flush()
            .map_err(|e| ExtractError::WriteFailed(e, out_path))?;

        Ok(())
    }
}

/// Reads exactly the stored bytes of one entry into memory.
fn read_stored(file: &mut File, record: &EntryRecord) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(record.offset))?;
    let mut stored = Vec::with_capacity(record.size.min(64 * 1024 * 1024) as usize);
    file.take(record.size).read_to_end(&mut stored)?;
    if (stored.len() as u64) < record.size {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(stored)
}

fn copy_chunked<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> std::io::Result<u64> {
    let mut buf = vec![0u8; STREAM_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}
