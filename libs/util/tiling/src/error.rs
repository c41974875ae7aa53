// This file is part of Regolith.
//
// Regolith is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Regolith is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Regolith.  If not, see <http://www.gnu.org/licenses/>.
use std::io;
use thiserror::Error;

/// The wire-visible error kinds of the engine. Reads that cannot locate a
/// key fail with NoSuchFile unless the caller used a maybe-form; format
/// corruption fails only the offending read; writer-side failures abort the
/// surrounding flush and leave the pre-flush state on disk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file: {0}")]
    NoSuchFile(String),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("format violation: {0}")]
    Format(String),
    #[error("inconsistent input: {0}")]
    InconsistentInput(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("read-only violation: {0}")]
    ReadOnly(String),
    // Cancellation is a first-class outcome of encoder and glue operations,
    // not a failure of the store.
    #[error("operation cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn no_such_file(what: impl Into<String>) -> Self {
        Self::NoSuchFile(what.into())
    }

    pub fn format(what: impl Into<String>) -> Self {
        Self::Format(what.into())
    }

    pub fn inconsistent(what: impl Into<String>) -> Self {
        Self::InconsistentInput(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    pub fn read_only(what: impl Into<String>) -> Self {
        Self::ReadOnly(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        Self::Internal(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NoSuchFile(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
