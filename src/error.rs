use std::path::PathBuf;

use thiserror::Error;

/// A log line that could not be decoded into a message record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct MalformedRecord {
    pub reason: &'static str,
}

impl MalformedRecord {
    pub(crate) fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("malformed record at line {line}: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: MalformedRecord,
    },
    #[error("timed out waiting for queue lock {}", .path.display())]
    LockTimeout { path: PathBuf },
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(&'static str),
    #[error("{0} lock poisoned by a panicking thread")]
    Poisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
