// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Errors that may occur around the compaction picker
///
/// Picking itself never fails; a strategy that does not apply
/// simply returns no compaction.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Persisted configuration could not be decoded
    Decode(DecodeError),

    /// Configuration was rejected by [`crate::Config::validate`]
    InvalidConfig(&'static str),

    /// Column family is not tracked by the compaction manager
    UnknownColumnFamily(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UniversalCompactionError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::InvalidConfig(_) | Self::UnknownColumnFamily(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Picker result
pub type Result<T> = std::result::Result<T, Error>;
