use std::io;
use std::path::PathBuf;

use qonvo_format::{ExtractError, OpenError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification for callers deciding between retry, report and
/// abort: I/O problems are often transient, format problems mean the file
/// cannot be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Format,
    Unexpected,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Board file not found: `{}`", .path.display())]
    NotFound { path: PathBuf },

    #[error("Cannot create boards directory `{}`", .path.display())]
    CreateBoardsDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot list boards directory `{}`", .path.display())]
    ListBoards {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open board container `{}`", .path.display())]
    OpenContainer {
        path: PathBuf,
        #[source]
        source: OpenError,
    },

    #[error("Cannot extract board container `{}`", .path.display())]
    ExtractContainer {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("Legacy board archive is invalid: `{}`", .path.display())]
    LegacyArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("No `board.json` entry in `{}`", .path.display())]
    MissingBoardEntry { path: PathBuf },

    #[error("Board data is not valid JSON")]
    InvalidBoardJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("Board data must be a JSON object at the top level")]
    UnexpectedBoardShape,

    #[error("Cannot encode board data")]
    EncodeBoard {
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot write board container `{}`", .path.display())]
    WriteBoard {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot commit board container `{}`", .path.display())]
    CommitBoard {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create staging directory `{}`", .path.display())]
    CreateStaging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot replace working directory `{}`", .path.display())]
    ReplaceWorkingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot delete board `{}`", .path.display())]
    DeleteBoard {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to download default board from `{url}`")]
    FetchDefault {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        use StoreError::*;

        match self {
            NotFound { .. }
            | CreateBoardsDir { .. }
            | ListBoards { .. }
            | WriteBoard { .. }
            | CommitBoard { .. }
            | CreateStaging { .. }
            | ReplaceWorkingDir { .. }
            | DeleteBoard { .. }
            | FetchDefault { .. } => ErrorCategory::Io,

            MissingBoardEntry { .. } | InvalidBoardJson { .. } | UnexpectedBoardShape => {
                ErrorCategory::Format
            }

            OpenContainer { source, .. } => match source {
                OpenError::InvalidPath(..) | OpenError::ReadFailed(..) => ErrorCategory::Io,
                _ => ErrorCategory::Format,
            },

            ExtractContainer { source, .. } => match source {
                ExtractError::DecompressionFailed(..)
                | ExtractError::ReadFailed(..)
                | ExtractError::MissingBoardEntry => ErrorCategory::Format,
                _ => ErrorCategory::Io,
            },

            LegacyArchive { source, .. } => match source {
                zip::result::ZipError::Io(_) => ErrorCategory::Io,
                _ => ErrorCategory::Format,
            },

            EncodeBoard { .. } => ErrorCategory::Unexpected,
        }
    }
}
