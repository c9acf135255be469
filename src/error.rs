//! Crate-wide error type.
//!
//! The reference kernel this is grounded on returns raw `u32` errno values
//! through `KResult<T> = Result<T, u32>` (see `prelude.rs`). The
//! specification calls for each error kind to be "a distinct case in the
//! return type", so this is a plain enum instead.

use core::fmt;

pub type KResult<T> = Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    NoSpace,
    Io { sector: u64 },
    Corruption { detail: &'static str },
    Busy,
    Timeout,
    Unsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NotFound => write!(f, "not found"),
            Error::AlreadyExists => write!(f, "already exists"),
            Error::NotADirectory => write!(f, "not a directory"),
            Error::IsADirectory => write!(f, "is a directory"),
            Error::DirectoryNotEmpty => write!(f, "directory not empty"),
            Error::NoSpace => write!(f, "no space left"),
            Error::Io { sector } => write!(f, "i/o error at sector {sector}"),
            Error::Corruption { detail } => write!(f, "corruption: {detail}"),
            Error::Busy => write!(f, "resource busy"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Unsupported => write!(f, "unsupported"),
        }
    }
}
