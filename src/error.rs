use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::encoding::NameEncoding;

/// Everything that can stop a batch from being decoded or extracted.
///
/// Format errors are fatal to the container being decoded, never to the
/// process.  Envelope problems do not appear here at all: a blob whose
/// envelope cannot be unpacked is written as-is.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported batch version: {0}")]
    UnsupportedVersion(u32),
    /// The stream ended (or a field could not be read) in the middle of an entry.
    #[error("Truncated {field} at offset {offset}")]
    Truncated { field: &'static str, offset: u64 },
    #[error("Malformed {encoding} name at offset {offset}")]
    InvalidName { encoding: NameEncoding, offset: u64 },
    #[error("ContentLength {declared} is larger than remaining data {remaining}")]
    ContentOutOfBounds { declared: u64, remaining: u64 },
    /// No name encoding parsed the whole container; one failure per attempt.
    #[error("Not a recognised batch ({})", describe_attempts(.attempts))]
    Unrecognized { attempts: Vec<(NameEncoding, Error)> },
    #[error("{}: {source}", .path.display())]
    Io {
        path:   PathBuf,
        source: io::Error,
    },
    #[error("Failed to write report: {0}")]
    Report(#[source] io::Error),
}

impl Error {
    /// True for errors caused by the bytes of the container itself.
    pub fn is_format_error(&self) -> bool {
        !matches!(self, Error::Io { .. } | Error::Report(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }
}

fn describe_attempts(attempts: &[(NameEncoding, Error)]) -> String {
    attempts
        .iter()
        .map(|(encoding, err)| format!("{encoding}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}
