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
use crate::key::Key;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tiling::{Error, Result, Runnable};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Make a fresh tile set; the target location must not hold one.
    Create,
    ReadWrite,
    ReadOnly,
}

#[derive(Copy, Clone, Debug)]
pub struct Stat {
    pub size: u64,
    pub last_modified: SystemTime,
}

/// Read-only after open.
#[derive(Copy, Clone, Debug)]
pub struct Capabilities {
    pub read_only: bool,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Resources {
    pub open_files: usize,
    pub memory: usize,
}

/// Uniform key -> bytes backend below a tile set. One writer per store;
/// readers are independent. All calls may block on I/O.
pub trait Driver: Send + Sync {
    /// Fetch a stream, failing with NoSuchFile when the key was never
    /// written.
    fn input(&self, key: Key) -> Result<Vec<u8>>;

    /// Null-on-not-found form of input.
    fn input_maybe(&self, key: Key) -> Result<Option<Vec<u8>>> {
        match self.input(key) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store a stream under the key; whole streams commit atomically.
    fn output(&mut self, key: Key, data: &[u8]) -> Result<()>;

    fn stat(&self, key: Key) -> Result<Stat>;

    /// Persist everything written so far; a reader opening after flush
    /// returns sees all of it.
    fn flush(&mut self) -> Result<()>;

    /// Install a cancellation token, polled before flush work.
    fn watch(&mut self, runnable: Runnable);

    fn capabilities(&self) -> Capabilities;

    /// Newest modification time over the whole store.
    fn last_modified(&self) -> Result<SystemTime>;

    fn resources(&self) -> Resources;
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::no_such_file(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })
}

// Commit-on-close for whole files: write to the side, rename into place.
pub(crate) fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut side = path.as_os_str().to_owned();
    side.push(".new");
    let side = PathBuf::from(side);
    fs::write(&side, data)?;
    fs::rename(&side, path)?;
    Ok(())
}

pub(crate) fn stat_file(path: &Path) -> Result<Stat> {
    let meta = fs::metadata(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::no_such_file(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(Stat {
        size: meta.len(),
        last_modified: meta.modified()?,
    })
}
