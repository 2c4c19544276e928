use std::fmt;
use std::io::{Read, Result, Seek, Write};

use comde::deflate::{DeflateCompressor, DeflateDecompressor};
use comde::stored::{StoredCompressor, StoredDecompressor};
use comde::{ByteCount, Compressor, Decompressor};

pub mod constants {
    /// TOC flags bit 0: entry data is deflate-compressed on disk.
    pub const FLAG_COMPRESSED: u8 = 0x01;
}

use self::constants::*;

/// Extensions that are already entropy-coded; deflating them again wastes
/// CPU on both ends for no gain.
const NO_COMPRESS_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "mp4", "mp3", "zip", "gz", "rar", "7z",
];

/// Whether an entry name (by its file extension) is a candidate for
/// deflate compression. The writer still falls back to stored when the
/// compressed form is not at least 10% smaller.
pub fn should_compress(name: &str) -> bool {
    let ext = name
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match ext {
        Some(ext) => !NO_COMPRESS_EXTS.contains(&ext.as_str()),
        None => true,
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Compression {
    Stored,
    Deflate,
}

impl Default for Compression {
    fn default() -> Self {
        Self::Stored
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Compression::*;

        let s = match self {
            Stored => "stored",
            Deflate => "DEFLATE",
        };

        write!(f, "{}", s)
    }
}

impl fmt::Debug for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Compression {
    pub const fn from_flags(flags: u8) -> Compression {
        if flags & FLAG_COMPRESSED != 0 {
            Compression::Deflate
        } else {
            Compression::Stored
        }
    }

    pub const fn flags(self) -> u8 {
        match self {
            Compression::Stored => 0,
            Compression::Deflate => FLAG_COMPRESSED,
        }
    }

    pub fn compress<W: Write + Seek, R: Read>(
        self,
        mut writer: W,
        reader: &mut R,
    ) -> Result<ByteCount> {
        use Compression::*;

        match self {
            Stored => StoredCompressor.compress(&mut writer, reader),
            Deflate => DeflateCompressor.compress(&mut writer, reader),
        }
    }

    pub fn decompress_write<R: Read, W: Write>(self, reader: R, writer: W) -> Result<()> {
        use Compression::*;

        match self {
            Stored => StoredDecompressor.copy(reader, writer),
            Deflate => DeflateDecompressor.copy(reader, writer),
        }?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_extensions_are_not_compressed() {
        assert!(!should_compress("attachments/abc123.png"));
        assert!(!should_compress("attachments/abc123.JPG"));
        assert!(!should_compress("repositories/7/movie.mp4"));
        assert!(!should_compress("archive.7z"));
    }

    #[test]
    fn everything_else_is_compressed() {
        assert!(should_compress("board.json"));
        assert!(should_compress("repositories/7/readme.md"));
        assert!(should_compress("attachments/abc123.txt"));
        assert!(should_compress("no_extension"));
    }

    #[test]
    fn flags_round_trip() {
        assert_eq!(Compression::from_flags(Compression::Deflate.flags()), Compression::Deflate);
        assert_eq!(Compression::from_flags(Compression::Stored.flags()), Compression::Stored);
        // Reserved bits are ignored.
        assert_eq!(Compression::from_flags(0xFE), Compression::Stored);
        assert_eq!(Compression::from_flags(0xFF), Compression::Deflate);
    }
}
