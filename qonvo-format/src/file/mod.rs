use std::io::Read;
use std::path::Path;

use crate::header::MAGIC_BYTES;

pub mod reader;
pub mod writer;

/// Sniffs whether `path` is a Qonvo container (as opposed to the legacy
/// archive format, or anything else). Reads only the first five bytes; any
/// I/O failure counts as "not a container".
pub fn is_container_file<P: AsRef<Path>>(path: P) -> bool {
    let mut magic = [0u8; 5];
    match std::fs::File::open(path.as_ref()).and_then(|mut f| f.read_exact(&mut magic)) {
        Ok(()) => &magic == MAGIC_BYTES,
        Err(_) => false,
    }
}
