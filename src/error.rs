use core::result;
use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// A helper type for wrapping a [result::Result] such that we can reduce noise in our signatures.
pub type Result<T> = result::Result<T, Error>;

/// An error representing a failure in any of the buffer, descriptor, selector or channel
/// implementations.
///
/// Note that would-block conditions are never represented here, those are returned as ordinary
/// values by the operations that can encounter them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("illegal state: {0}")]
    State(&'static str),
    #[error("{call} failed: {errno}")]
    SystemCall { call: &'static str, errno: Errno },
    #[error("host {host} is unknown: {reason}")]
    UnknownHost { host: String, reason: String },
}

impl Error {
    /// Build a [Error::SystemCall] from the current thread's errno.
    pub(crate) fn last(call: &'static str) -> Error {
        Error::SystemCall {
            call,
            errno: Errno::last(),
        }
    }

    pub(crate) fn system(call: &'static str, errno: Errno) -> Error {
        Error::SystemCall { call, errno }
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Error {
        Error::Argument(msg.into())
    }

    /// Return the raw errno if this error was produced by a failing system call.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::SystemCall { errno, .. } => Some(*errno as i32),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::SystemCall { errno, .. } => io::Error::from_raw_os_error(errno as i32),
            Error::Argument(..) => io::Error::new(io::ErrorKind::InvalidInput, value),
            Error::State(..) => io::Error::new(io::ErrorKind::Other, value),
            Error::UnknownHost { .. } => io::Error::new(io::ErrorKind::NotFound, value),
        }
    }
}
