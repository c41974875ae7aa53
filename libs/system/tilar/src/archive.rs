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
    crc32::crc32,
    format::{
        overlay, FileIndex, Header, IndexEntry, IndexHead, JournalRecord, Options, Trailer,
        ENTRY_SIZE, HEADER_SIZE, INDEX_HEAD_SIZE, INDEX_MAGIC, JOURNAL_MAGIC, RECORD_SIZE,
        TRAILER_MAGIC, TRAILER_SIZE,
    },
    lock,
};
use fxhash::FxHashMap;
use log::{debug, trace, warn};
use memmap::{Mmap, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};
use tiling::{Error, Result};
use zerocopy::{byteorder::U32, AsBytes};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenMode {
    Append,
    ReadOnly,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Slot {
    offset: u64,
    length: u64,
    crc32: u32,
}

enum Backing {
    // The writer keeps the plain handle; every access seeks explicitly.
    Writer(File),
    // Readers map the whole file once. The handle is retained because the
    // shared lock lives exactly as long as it does.
    Reader(Mmap, #[allow(dead_code)] File),
}

/// One archive file: an exclusive-writer, multi-reader container of blobs
/// addressed by FileIndex. See the module docs for the on-disk layout.
pub struct Tilar {
    path: PathBuf,
    options: Options,
    uuid: [u8; 16],
    backing: Backing,
    // Last flushed (or recovered) view, then writes since. Lookups go
    // dirty-first so an unflushed write supersedes the persistent index.
    index: FxHashMap<FileIndex, Slot>,
    dirty: FxHashMap<FileIndex, Slot>,
    end: u64,
    has_trailer: bool,
}

impl Tilar {
    /// Create a fresh archive. Fails with AlreadyExists when the path is
    /// occupied; an existing archive is never silently clobbered.
    pub fn create(path: &Path, options: Options) -> Result<Tilar> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Error::already_exists(path.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?;
        lock::lock_exclusive(&file)?;
        let uuid = rand::random::<[u8; 16]>();
        let header = Header::new(uuid, &options);
        file.write_all(header.as_bytes())?;
        trace!("tilar create {:?} order={}", path, options.binary_order);
        Ok(Tilar {
            path: path.to_owned(),
            options,
            uuid,
            backing: Backing::Writer(file),
            index: FxHashMap::default(),
            dirty: FxHashMap::default(),
            end: HEADER_SIZE as u64,
            has_trailer: false,
        })
    }

    /// Open an existing archive. The trailer is probed first; failing
    /// that, the journal is replayed to the last crc-consistent record and
    /// (in append mode) any torn tail is cut off.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Tilar> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::Append)
            .open(path)
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::no_such_file(path.display().to_string())
                } else {
                    Error::Io(e)
                }
            })?;
        match mode {
            OpenMode::Append => lock::lock_exclusive(&file)?,
            OpenMode::ReadOnly => lock::lock_shared(&file)?,
        }

        match mode {
            OpenMode::ReadOnly => {
                // Safety: the shared lock keeps writers away while mapped.
                let map = unsafe { MmapOptions::new().map(&file)? };
                let header = *Header::parse(&map)?;
                let (index, _end, has_trailer) = Self::load_view(&map);
                Ok(Tilar {
                    path: path.to_owned(),
                    options: header.options(),
                    uuid: header.uuid,
                    backing: Backing::Reader(map, file),
                    index,
                    dirty: FxHashMap::default(),
                    end: 0,
                    has_trailer,
                })
            }
            OpenMode::Append => {
                let mut data = Vec::new();
                (&file).seek(SeekFrom::Start(0))?;
                (&file).read_to_end(&mut data)?;
                let header = *Header::parse(&data)?;
                let (index, end, has_trailer) = Self::load_view(&data);
                if end < data.len() as u64 {
                    warn!(
                        "tilar {:?}: truncating {} bytes of torn tail",
                        path,
                        data.len() as u64 - end
                    );
                    file.set_len(end)?;
                }
                Ok(Tilar {
                    path: path.to_owned(),
                    options: header.options(),
                    uuid: header.uuid,
                    backing: Backing::Writer(file),
                    index,
                    dirty: FxHashMap::default(),
                    end,
                    has_trailer,
                })
            }
        }
    }

    // The consistent view of an archive image: trailer if valid, journal
    // replay otherwise. Returns the live index, the end of consistent
    // data, and whether a valid trailer was found at the end.
    fn load_view(data: &[u8]) -> (FxHashMap<FileIndex, Slot>, u64, bool) {
        if let Some(index) = Self::probe_trailer(data) {
            return (index, data.len() as u64, true);
        }
        let (index, end) = Self::replay_journal(data);
        (index, end, false)
    }

    fn probe_trailer(data: &[u8]) -> Option<FxHashMap<FileIndex, Slot>> {
        if data.len() < HEADER_SIZE + INDEX_HEAD_SIZE + TRAILER_SIZE {
            return None;
        }
        let trailer_offset = data.len() - TRAILER_SIZE;
        let trailer = overlay::<Trailer>(&data[trailer_offset..], "archive trailer").ok()?;
        if trailer.magic != TRAILER_MAGIC {
            return None;
        }
        let index_offset = trailer.index_offset.get() as usize;
        if index_offset < HEADER_SIZE || index_offset + INDEX_HEAD_SIZE > trailer_offset {
            return None;
        }
        let head = overlay::<IndexHead>(&data[index_offset..], "index head").ok()?;
        if head.magic.get() != INDEX_MAGIC {
            return None;
        }
        let count = head.count.get() as usize;
        let block_end = index_offset + INDEX_HEAD_SIZE + count * ENTRY_SIZE;
        if block_end != trailer_offset {
            return None;
        }
        if crc32(&data[index_offset..block_end]) != trailer.index_crc32.get() {
            return None;
        }
        let mut index = FxHashMap::default();
        for i in 0..count {
            let offset = index_offset + INDEX_HEAD_SIZE + i * ENTRY_SIZE;
            let entry = overlay::<IndexEntry>(&data[offset..], "index entry").ok()?;
            index.insert(
                FileIndex::new(entry.x, entry.y, entry.kind),
                Slot {
                    offset: entry.offset.get(),
                    length: entry.length.get(),
                    crc32: entry.crc32.get(),
                },
            );
        }
        Some(index)
    }

    fn replay_journal(data: &[u8]) -> (FxHashMap<FileIndex, Slot>, u64) {
        let mut index = FxHashMap::default();
        let mut pos = HEADER_SIZE;
        let mut records = 0usize;
        while pos + 2 <= data.len() {
            let magic = u16::from_le_bytes([data[pos], data[pos + 1]]);
            if magic == INDEX_MAGIC {
                // A previously flushed index block plus its trailer; the
                // records around it carry all the same information.
                let head = match overlay::<IndexHead>(&data[pos..], "index head") {
                    Ok(head) => head,
                    Err(_) => break,
                };
                let block = INDEX_HEAD_SIZE
                    + head.count.get() as usize * ENTRY_SIZE
                    + TRAILER_SIZE;
                match pos.checked_add(block) {
                    Some(next) if next <= data.len() => pos = next,
                    _ => break,
                }
                continue;
            }
            if magic != JOURNAL_MAGIC {
                break;
            }
            let record = match overlay::<JournalRecord>(&data[pos..], "journal record") {
                Ok(record) => record,
                Err(_) => break,
            };
            let blob_offset = pos + RECORD_SIZE;
            if record.offset.get() != blob_offset as u64 {
                break;
            }
            let length = record.length.get() as usize;
            let blob_end = match blob_offset.checked_add(length) {
                Some(end) if end <= data.len() => end,
                _ => break,
            };
            if crc32(&data[blob_offset..blob_end]) != record.crc32.get() {
                // Torn blob at the tail; everything before it is good.
                break;
            }
            index.insert(
                record.file_index(),
                Slot {
                    offset: record.offset.get(),
                    length: record.length.get(),
                    crc32: record.crc32.get(),
                },
            );
            records += 1;
            pos = blob_end;
        }
        debug!(
            "tilar journal replay: {} records, {} live entries",
            records,
            index.len()
        );
        (index, pos as u64)
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.backing, Backing::Writer(_))
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Number of live blobs in the merged view.
    pub fn len(&self) -> usize {
        let mut count = self.index.len();
        for key in self.dirty.keys() {
            if !self.index.contains_key(key) {
                count += 1;
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: FileIndex) -> bool {
        self.dirty.contains_key(&index) || self.index.contains_key(&index)
    }

    /// The merged (FileIndex, blob length) view, dirty entries superseding
    /// flushed ones.
    pub fn entries(&self) -> Vec<(FileIndex, u64)> {
        let mut merged = self.index.clone();
        for (key, slot) in &self.dirty {
            merged.insert(*key, *slot);
        }
        let mut out = merged
            .into_iter()
            .map(|(key, slot)| (key, slot.length))
            .collect::<Vec<_>>();
        out.sort_unstable_by_key(|(key, _)| (key.kind, key.y, key.x));
        out
    }

    /// Append a blob. The journal record lands in front of the blob in one
    /// logical append, so a crash mid-write is detected on recovery.
    pub fn put(&mut self, index: FileIndex, data: &[u8]) -> Result<()> {
        index.check(&self.options)?;
        let file = match &self.backing {
            Backing::Writer(file) => file,
            Backing::Reader(..) => {
                return Err(Error::read_only(self.path.display().to_string()))
            }
        };
        let blob_offset = self.end + RECORD_SIZE as u64;
        let record = JournalRecord::new(index, blob_offset, data);
        let mut out = file;
        out.seek(SeekFrom::Start(self.end))?;
        out.write_all(record.as_bytes())?;
        out.write_all(data)?;
        self.dirty.insert(
            index,
            Slot {
                offset: blob_offset,
                length: data.len() as u64,
                crc32: record.crc32.get(),
            },
        );
        self.end = blob_offset + data.len() as u64;
        Ok(())
    }

    fn slot(&self, index: FileIndex) -> Option<Slot> {
        self.dirty
            .get(&index)
            .or_else(|| self.index.get(&index))
            .copied()
    }

    /// Fetch one blob, NoSuchFile when the slot was never written.
    pub fn get(&self, index: FileIndex) -> Result<Vec<u8>> {
        index.check(&self.options)?;
        let slot = self.slot(index).ok_or_else(|| {
            Error::no_such_file(format!(
                "{}:{}-{}-{}",
                self.path.display(),
                index.x,
                index.y,
                index.kind
            ))
        })?;
        match &self.backing {
            Backing::Reader(map, _) => {
                let start = slot.offset as usize;
                let end = start + slot.length as usize;
                if end > map.len() {
                    return Err(Error::format("archive entry outside mapped file"));
                }
                Ok(map[start..end].to_vec())
            }
            Backing::Writer(file) => {
                let mut buffer = vec![0u8; slot.length as usize];
                let mut input = file;
                input.seek(SeekFrom::Start(slot.offset))?;
                input.read_exact(&mut buffer)?;
                Ok(buffer)
            }
        }
    }

    /// Size of the live blob at the given slot, if any.
    pub fn length_of(&self, index: FileIndex) -> Option<u64> {
        self.slot(index).map(|slot| slot.length)
    }

    pub fn get_maybe(&self, index: FileIndex) -> Result<Option<Vec<u8>>> {
        match self.get(index) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Publish the current view: append a fresh index block, fsync, then
    /// swap the trailer in and fsync again. Until this returns, readers
    /// opening the file see the previous flush (or the journal).
    pub fn flush(&mut self) -> Result<()> {
        let file = match &self.backing {
            Backing::Writer(file) => file,
            Backing::Reader(..) => {
                return Err(Error::read_only(self.path.display().to_string()))
            }
        };
        if self.dirty.is_empty() && self.has_trailer {
            return Ok(());
        }
        let mut merged = self.index.clone();
        for (key, slot) in &self.dirty {
            merged.insert(*key, *slot);
        }
        let mut keys = merged.keys().copied().collect::<Vec<_>>();
        keys.sort_unstable_by_key(|key| (key.kind, key.y, key.x));

        let mut block = Vec::with_capacity(INDEX_HEAD_SIZE + keys.len() * ENTRY_SIZE);
        block.extend_from_slice(
            IndexHead {
                magic: zerocopy::byteorder::U16::new(INDEX_MAGIC),
                count: U32::new(keys.len() as u32),
            }
            .as_bytes(),
        );
        for key in &keys {
            let slot = merged[key];
            block.extend_from_slice(
                IndexEntry {
                    x: key.x,
                    y: key.y,
                    kind: key.kind,
                    reserved: 0,
                    offset: zerocopy::byteorder::U64::new(slot.offset),
                    length: zerocopy::byteorder::U64::new(slot.length),
                    crc32: U32::new(slot.crc32),
                }
                .as_bytes(),
            );
        }
        let trailer = Trailer {
            magic: TRAILER_MAGIC,
            index_offset: zerocopy::byteorder::U64::new(self.end),
            index_crc32: U32::new(crc32(&block)),
        };

        let mut out = file;
        out.seek(SeekFrom::Start(self.end))?;
        out.write_all(&block)?;
        file.sync_data()?;
        let mut out = file;
        out.write_all(trailer.as_bytes())?;
        file.sync_data()?;

        self.end += (block.len() + TRAILER_SIZE) as u64;
        self.index = merged;
        self.dirty.clear();
        self.has_trailer = true;
        debug!(
            "tilar flush {:?}: {} live entries",
            self.path,
            self.index.len()
        );
        Ok(())
    }

    pub fn last_modified(&self) -> Result<SystemTime> {
        Ok(std::fs::metadata(&self.path)?.modified()?)
    }
}
