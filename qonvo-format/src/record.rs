use crate::{compression::Compression, path::EntryName};

/// Name of the single required entry holding the serialized document tree.
pub const BOARD_ENTRY: &str = "board.json";

/// Entry-name prefix for attachment payloads.
pub const ATTACHMENTS_PREFIX: &str = "attachments/";

/// Entry-name prefix for mirrored repository-node folders.
pub const REPOSITORIES_PREFIX: &str = "repositories/";

/// One table-of-contents record. Records are written in the same order as
/// the data bodies they describe; offsets are monotonically increasing and
/// non-overlapping.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    /// Archive-relative entry name, forward slashes.
    pub name: EntryName,

    /// Absolute file offset of the entry data.
    pub offset: u64,

    /// Size on disk, i.e. after optional compression.
    pub size: u64,

    pub compression: Compression,
}

impl EntryRecord {
    #[inline(always)]
    pub fn name(&self) -> &EntryName {
        &self.name
    }

    #[inline(always)]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Bytes this record occupies in the TOC:
    /// name length (2) + name + offset (8) + size (8) + flags (1).
    pub(crate) fn toc_len(&self) -> u64 {
        2 + self.name.as_str().len() as u64 + 8 + 8 + 1
    }

    /// Whether this entry is extracted to disk during a streaming full
    /// extraction (as opposed to the in-memory document entry).
    pub fn is_payload(&self) -> bool {
        self.name.starts_with(ATTACHMENTS_PREFIX) || self.name.starts_with(REPOSITORIES_PREFIX)
    }
}
