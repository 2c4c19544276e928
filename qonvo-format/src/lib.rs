mod compression;
mod de;
mod file;
mod header;
pub mod path;
mod record;
mod ser;

pub use compression::{should_compress, Compression};
pub use file::is_container_file;
pub use file::reader::{ExtractError, ExtractStats, ExtractedBoard, OpenError, QonvoFileReader};
pub use file::writer::QonvoFileWriter;
pub use header::FORMAT_VERSION;
pub use path::EntryName;
pub use record::{EntryRecord, ATTACHMENTS_PREFIX, BOARD_ENTRY, REPOSITORIES_PREFIX};
