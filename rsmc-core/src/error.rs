//! The engine's internal error type.
//!
//! Per the client's error model (see `client` module docs), almost none of
//! this ever reaches an application: the public command methods swallow
//! every *expected* failure into the command's default return value and
//! emit a `tracing` event instead. `Error` still exists, and is `pub`, so
//! that the pieces of the engine that can genuinely fail (serialization,
//! wire parsing, socket I/O) have a real type to fail with internally, and
//! so a caller who installs a `tracing` subscriber can see why a default
//! came back.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

use crate::protocol::{ProtocolError, Status};

/// An error occurring during communication with memcached, or while
/// preparing a value to send to it.
#[derive(Debug)]
pub enum Error {
    /// An error communicating over the wire (includes connect failures).
    Io(std::io::Error),
    /// An error caused by a server reply the protocol driver could not
    /// make sense of.
    Protocol(ProtocolError),
    /// A non-zero status/negative reply from the server for a single
    /// request.
    Status(Status),
    /// An error (de-)serializing an application value.
    Serialize(bincode::Error),
    /// An error (de-)serializing a JSON-encoded application value.
    Json(serde_json::Error),
    /// A key failed validation (empty, oversized, or contains a space).
    InvalidKey,
    /// The selector returned no server for a key (no servers configured).
    NoRoute,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Self::Status(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialize(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::Io(err) => write!(f, "IoError: {}", err),
            Error::Protocol(err) => write!(f, "ProtocolError: {}", err),
            Error::Status(err) => write!(f, "StatusError: {}", err),
            Error::Serialize(err) => write!(f, "SerializeError: {}", err),
            Error::Json(err) => write!(f, "JsonError: {}", err),
            Error::InvalidKey => write!(f, "InvalidKey: key is empty, too long, or contains a space"),
            Error::NoRoute => write!(f, "NoRoute: no server configured for key"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Protocol(err) => Some(err),
            Error::Status(err) => Some(err),
            Error::Serialize(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::InvalidKey | Error::NoRoute => None,
        }
    }
}
