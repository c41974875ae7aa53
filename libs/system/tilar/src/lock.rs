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
use std::fs::File;
use tiling::{Error, Result};

// Advisory archive locking: one exclusive writer, any number of shared
// readers. The lock lives for as long as the File handle and is released
// by the OS on crash, which is what makes journal recovery safe to run.

#[cfg(unix)]
pub(crate) fn lock_exclusive(file: &File) -> Result<()> {
    flock(file, libc::LOCK_EX | libc::LOCK_NB)
        .map_err(|_| Error::already_exists("archive writer lock".to_owned()))
}

#[cfg(unix)]
pub(crate) fn lock_shared(file: &File) -> Result<()> {
    flock(file, libc::LOCK_SH | libc::LOCK_NB).map_err(Error::Io)
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // Safety: flock on a valid owned descriptor.
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub(crate) fn lock_exclusive(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn lock_shared(_file: &File) -> Result<()> {
    Ok(())
}
