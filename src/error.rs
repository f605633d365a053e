//! Error taxonomy shared by every operation in the crate.
//!
//! All fallible operations return [`Result`]. The variants split into three
//! classes:
//! - expected outcomes ([`Error::Full`], [`Error::Empty`], [`Error::NotFound`]
//!   on lookups): ordinary control flow, cheap to produce, never logged;
//! - programming errors (`InvalidArgument`, `OutOfRange`, `AlreadyExists`,
//!   `TableFull`, `Unsupported`): surfaced immediately, no partial state;
//! - environment errors (`Io`, `OutOfMemory`): fatal to the operation, never
//!   retried by this crate.
//!
//! Each variant has a stable integer code (for foreign-ABI consumers that
//! share a segment with this crate) and a stable message prefix.

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The uniform tagged outcome of every fallible operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No segment or table entry with the requested name.
    #[error("not found")]
    NotFound,
    /// A segment or table entry with this name already exists.
    #[error("already exists")]
    AlreadyExists,
    /// The structure is at capacity. An expected outcome, not a failure.
    #[error("full")]
    Full,
    /// The structure holds no elements. An expected outcome, not a failure.
    #[error("empty")]
    Empty,
    /// Index past the end of the structure.
    #[error("out of range")]
    OutOfRange,
    /// A parameter violates the operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The table has no free entry slots left.
    #[error("table full")]
    TableFull,
    /// The bump allocation would exceed the segment capacity.
    #[error("out of memory")]
    OutOfMemory,
    /// The host cannot perform this operation (e.g. CAS on a 3-byte element).
    #[error("unsupported")]
    Unsupported,
    /// An OS call failed for a reason outside the taxonomy above.
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
}

impl Error {
    /// Stable integer code, as observed across the shared-memory ABI.
    /// Success is code 0 by convention; errors start at 1.
    pub fn code(&self) -> u32 {
        match self {
            Error::NotFound => 1,
            Error::AlreadyExists => 2,
            Error::Full => 3,
            Error::Empty => 4,
            Error::OutOfRange => 5,
            Error::InvalidArgument(_) => 6,
            Error::TableFull => 7,
            Error::OutOfMemory => 8,
            Error::Unsupported => 9,
            Error::Io(_) => 10,
        }
    }

    /// Stable human-readable message for the code, independent of any
    /// per-instance detail carried by the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::NotFound => "not found",
            Error::AlreadyExists => "already exists",
            Error::Full => "full",
            Error::Empty => "empty",
            Error::OutOfRange => "out of range",
            Error::InvalidArgument(_) => "invalid argument",
            Error::TableFull => "table full",
            Error::OutOfMemory => "out of memory",
            Error::Unsupported => "unsupported",
            Error::Io(_) => "i/o error",
        }
    }
}

impl From<io::Error> for Error {
    /// Fold the errno kinds that have a dedicated variant into the taxonomy;
    /// everything else stays an opaque [`Error::Io`].
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound,
            io::ErrorKind::AlreadyExists => Error::AlreadyExists,
            _ => Error::Io(e),
        }
    }
}
