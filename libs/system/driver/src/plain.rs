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
use crate::{
    interface::{read_file, stat_file, write_file_atomic, Capabilities, Driver, Mode, Resources,
                Stat},
    key::Key,
};
use log::trace;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tiling::{Error, Result, Runnable};

/// The loose-files backend: one file per key in a single directory. Slow
/// for big stores but transparent, which makes it the debugging and
/// interchange format.
pub struct PlainDriver {
    root: PathBuf,
    read_only: bool,
    runnable: Runnable,
}

impl PlainDriver {
    pub fn open(root: &Path, mode: Mode) -> Result<PlainDriver> {
        match mode {
            Mode::Create => {
                if root.exists() && fs::read_dir(root)?.next().is_some() {
                    return Err(Error::already_exists(root.display().to_string()));
                }
                fs::create_dir_all(root)?;
            }
            Mode::ReadWrite | Mode::ReadOnly => {
                if !root.is_dir() {
                    return Err(Error::no_such_file(root.display().to_string()));
                }
            }
        }
        trace!("plain driver open {:?} ({:?})", root, mode);
        Ok(PlainDriver {
            root: root.to_owned(),
            read_only: mode == Mode::ReadOnly,
            runnable: Runnable::new(),
        })
    }

    fn path_for(&self, key: Key) -> PathBuf {
        match key {
            Key::Tile(id, file) => self
                .root
                .join(format!("{}-{}-{}.{}", id.lod(), id.x(), id.y(), file.extension())),
            Key::File(file) => self.root.join(file.filename()),
        }
    }
}

impl Driver for PlainDriver {
    fn input(&self, key: Key) -> Result<Vec<u8>> {
        read_file(&self.path_for(key))
    }

    fn output(&mut self, key: Key, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::read_only(format!("{}", key)));
        }
        write_file_atomic(&self.path_for(key), data)
    }

    fn stat(&self, key: Key) -> Result<Stat> {
        stat_file(&self.path_for(key))
    }

    fn flush(&mut self) -> Result<()> {
        // Every output already committed; only the cancel gate remains.
        self.runnable.check()
    }

    fn watch(&mut self, runnable: Runnable) {
        self.runnable = runnable;
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: self.read_only,
        }
    }

    fn last_modified(&self) -> Result<SystemTime> {
        let mut newest = fs::metadata(&self.root)?.modified()?;
        for entry in fs::read_dir(&self.root)? {
            let modified = entry?.metadata()?.modified()?;
            if modified > newest {
                newest = modified;
            }
        }
        Ok(newest)
    }

    fn resources(&self) -> Resources {
        Resources::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{FileType, TileFile};
    use anyhow::Result;
    use tiling::TileId;

    #[test]
    fn test_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("plain");
        let mut driver = PlainDriver::open(&root, Mode::Create)?;
        let key = Key::Tile(TileId::new(3, 2, 1), TileFile::Mesh);
        driver.output(key, b"payload")?;
        driver.output(Key::File(FileType::Config), b"{}")?;
        driver.flush()?;
        assert_eq!(driver.input(key)?, b"payload");
        assert_eq!(driver.stat(key)?.size, 7);

        let reader = PlainDriver::open(&root, Mode::ReadOnly)?;
        assert_eq!(reader.input(key)?, b"payload");
        assert!(reader.capabilities().read_only);
        assert!(reader
            .input_maybe(Key::Tile(TileId::new(3, 1, 2), TileFile::Mesh))?
            .is_none());
        Ok(())
    }

    #[test]
    fn test_read_only_rejects_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("ro");
        drop(PlainDriver::open(&root, Mode::Create)?);
        let mut driver = PlainDriver::open(&root, Mode::ReadOnly)?;
        assert!(matches!(
            driver.output(Key::File(FileType::Config), b"{}"),
            Err(Error::ReadOnly(_))
        ));
        Ok(())
    }

    #[test]
    fn test_create_refuses_populated_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("occupied");
        fs::create_dir_all(&root)?;
        fs::write(root.join("stray"), b"x")?;
        assert!(matches!(
            PlainDriver::open(&root, Mode::Create),
            Err(Error::AlreadyExists(_))
        ));
        Ok(())
    }
}
