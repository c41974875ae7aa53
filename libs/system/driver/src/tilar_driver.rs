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
    key::{Key, TileFile},
};
use fxhash::FxHashMap;
use log::{debug, trace};
use parking_lot::Mutex;
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tilar::{FileIndex, OpenMode, Options, Tilar};
use tiling::{Error, Lod, Result, Runnable, TileId};

/// Shape of the archive grid. Tile payloads group 2^binary_order tiles per
/// archive axis; metatiles are pre-divided by meta_unit before the same
/// grouping, since they only exist on the meta grid.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TilarDriverOptions {
    pub binary_order: u8,
    pub meta_unit: u8,
}

impl Default for TilarDriverOptions {
    fn default() -> Self {
        Self {
            binary_order: 5,
            meta_unit: 5,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
struct ArchiveKey {
    lod: Lod,
    ax: u32,
    ay: u32,
    meta: bool,
}

/// The production backend: per-lod directories of tilar archives, each
/// holding one super-tile's mesh/atlas/navtile slots, with metatiles in
/// their own single-slot archives alongside.
pub struct TilarDriver {
    root: PathBuf,
    options: TilarDriverOptions,
    read_only: bool,
    runnable: Runnable,
    archives: Mutex<FxHashMap<ArchiveKey, Tilar>>,
}

impl TilarDriver {
    pub fn open(root: &Path, mode: Mode, options: TilarDriverOptions) -> Result<TilarDriver> {
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
        trace!(
            "tilar driver open {:?} ({:?}, order={})",
            root,
            mode,
            options.binary_order
        );
        Ok(TilarDriver {
            root: root.to_owned(),
            options,
            read_only: mode == Mode::ReadOnly,
            runnable: Runnable::new(),
            archives: Mutex::new(FxHashMap::default()),
        })
    }

    fn resolve(&self, id: TileId, file: TileFile) -> (ArchiveKey, FileIndex) {
        let order = self.options.binary_order;
        let mask = (1u32 << order) - 1;
        let (x, y, meta) = match file {
            TileFile::Meta => (
                id.x() >> self.options.meta_unit,
                id.y() >> self.options.meta_unit,
                true,
            ),
            _ => (id.x(), id.y(), false),
        };
        (
            ArchiveKey {
                lod: id.lod(),
                ax: x >> order,
                ay: y >> order,
                meta,
            },
            FileIndex::new((x & mask) as u8, (y & mask) as u8, file.archive_kind()),
        )
    }

    fn archive_path(&self, key: &ArchiveKey) -> PathBuf {
        let name = if key.meta {
            format!("{}-{}.meta.tilar", key.ax, key.ay)
        } else {
            format!("{}-{}.tilar", key.ax, key.ay)
        };
        self.root.join(format!("{}", key.lod)).join(name)
    }

    fn archive_options(&self, key: &ArchiveKey) -> Options {
        Options::new(
            self.options.binary_order,
            if key.meta { 1 } else { 3 },
        )
    }

    fn with_archive<R>(
        &self,
        key: ArchiveKey,
        create: bool,
        f: impl FnOnce(&mut Tilar) -> Result<R>,
    ) -> Result<R> {
        let mut cache = self.archives.lock();
        if !cache.contains_key(&key) {
            let path = self.archive_path(&key);
            let archive = if self.read_only {
                Tilar::open(&path, OpenMode::ReadOnly)?
            } else if path.exists() {
                Tilar::open(&path, OpenMode::Append)?
            } else if create {
                fs::create_dir_all(path.parent().expect("archive path has a parent"))?;
                Tilar::create(&path, self.archive_options(&key))?
            } else {
                return Err(Error::no_such_file(path.display().to_string()));
            };
            cache.insert(key, archive);
        }
        f(cache.get_mut(&key).expect("archive just inserted"))
    }
}

impl Driver for TilarDriver {
    fn input(&self, key: Key) -> Result<Vec<u8>> {
        match key {
            Key::Tile(id, file) => {
                let (akey, index) = self.resolve(id, file);
                self.with_archive(akey, false, |archive| archive.get(index))
            }
            Key::File(file) => read_file(&self.root.join(file.filename())),
        }
    }

    fn output(&mut self, key: Key, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::read_only(format!("{}", key)));
        }
        match key {
            Key::Tile(id, file) => {
                let (akey, index) = self.resolve(id, file);
                self.with_archive(akey, true, |archive| archive.put(index, data))
            }
            Key::File(file) => write_file_atomic(&self.root.join(file.filename()), data),
        }
    }

    fn stat(&self, key: Key) -> Result<Stat> {
        match key {
            Key::Tile(id, file) => {
                let (akey, index) = self.resolve(id, file);
                self.with_archive(akey, false, |archive| {
                    let size = archive.length_of(index).ok_or_else(|| {
                        Error::no_such_file(format!("{}", Key::Tile(id, file)))
                    })?;
                    Ok(Stat {
                        size,
                        last_modified: archive.last_modified()?,
                    })
                })
            }
            Key::File(file) => stat_file(&self.root.join(file.filename())),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.runnable.check()?;
        let mut cache = self.archives.lock();
        let mut flushed = 0usize;
        for archive in cache.values_mut() {
            if archive.is_writable() && archive.is_dirty() {
                archive.flush()?;
                flushed += 1;
            }
        }
        if !self.read_only {
            // Sweep: drop every handle so writer locks release promptly;
            // later access reopens lazily.
            cache.clear();
        }
        debug!("tilar driver flush {:?}: {} archives", self.root, flushed);
        Ok(())
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
        fn newest_under(path: &Path, newest: &mut SystemTime) -> Result<()> {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                let modified = meta.modified()?;
                if modified > *newest {
                    *newest = modified;
                }
                if meta.is_dir() {
                    newest_under(&entry.path(), newest)?;
                }
            }
            Ok(())
        }
        let mut newest = fs::metadata(&self.root)?.modified()?;
        newest_under(&self.root, &mut newest)?;
        Ok(newest)
    }

    fn resources(&self) -> Resources {
        Resources {
            open_files: self.archives.lock().len(),
            memory: 0,
        }
    }
}
