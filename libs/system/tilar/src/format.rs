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
use crate::crc32::crc32;
use static_assertions::const_assert_eq;
use std::mem;
use tiling::{Error, Result};
use zerocopy::{
    byteorder::{LittleEndian as LE, U16, U32, U64},
    AsBytes, FromBytes, LayoutVerified, Unaligned,
};

pub(crate) const HEADER_MAGIC: [u8; 6] = *b"TILAR\0";
pub(crate) const HEADER_VERSION: u8 = 1;
pub(crate) const TRAILER_MAGIC: [u8; 6] = *b"TIDX\0\0";
pub(crate) const JOURNAL_MAGIC: u16 = u16::from_le_bytes(*b"JR");
pub(crate) const INDEX_MAGIC: u16 = u16::from_le_bytes(*b"IX");

/// Shape parameters of one archive: 2^binary_order tiles per axis and
/// files_per_tile payload slots per tile.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub binary_order: u8,
    pub files_per_tile: u8,
}

impl Options {
    pub fn new(binary_order: u8, files_per_tile: u8) -> Self {
        assert!(binary_order > 0 && binary_order <= 8);
        assert!(files_per_tile > 0);
        Self {
            binary_order,
            files_per_tile,
        }
    }

    pub fn edge(&self) -> u32 {
        1 << self.binary_order
    }

    pub fn mask(&self) -> u32 {
        self.edge() - 1
    }
}

/// Address of one payload slot inside an archive: tile coordinates within
/// the super-tile plus the payload kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FileIndex {
    pub x: u8,
    pub y: u8,
    pub kind: u8,
}

impl FileIndex {
    pub fn new(x: u8, y: u8, kind: u8) -> Self {
        Self { x, y, kind }
    }

    pub(crate) fn check(&self, options: &Options) -> Result<()> {
        if (self.x as u32) < options.edge()
            && (self.y as u32) < options.edge()
            && self.kind < options.files_per_tile
        {
            Ok(())
        } else {
            Err(Error::inconsistent(format!(
                "file index ({}, {}, {}) outside archive shape ({}, {})",
                self.x, self.y, self.kind, options.binary_order, options.files_per_tile
            )))
        }
    }
}

#[derive(Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Header {
    pub(crate) magic: [u8; 6],
    pub(crate) version: u8,
    pub(crate) uuid: [u8; 16],
    pub(crate) binary_order: u8,
    pub(crate) files_per_tile: u8,
    pub(crate) crc32: U32<LE>,
}

pub(crate) const HEADER_SIZE: usize = mem::size_of::<Header>();
const_assert_eq!(HEADER_SIZE, 29);

impl Header {
    pub(crate) fn new(uuid: [u8; 16], options: &Options) -> Self {
        let mut header = Self {
            magic: HEADER_MAGIC,
            version: HEADER_VERSION,
            uuid,
            binary_order: options.binary_order,
            files_per_tile: options.files_per_tile,
            crc32: U32::new(0),
        };
        let sum = crc32(&header.as_bytes()[..HEADER_SIZE - 4]);
        header.crc32 = U32::new(sum);
        header
    }

    pub(crate) fn parse(data: &[u8]) -> Result<&Header> {
        let header = overlay::<Header>(data, "archive header")?;
        if header.magic != HEADER_MAGIC {
            return Err(Error::format("not a tilar archive"));
        }
        if header.version != HEADER_VERSION {
            return Err(Error::format(format!(
                "unsupported tilar version {}",
                header.version
            )));
        }
        let sum = crc32(&data[..HEADER_SIZE - 4]);
        if sum != header.crc32.get() {
            return Err(Error::format("tilar header crc mismatch"));
        }
        Ok(header)
    }

    pub(crate) fn options(&self) -> Options {
        Options::new(self.binary_order, self.files_per_tile)
    }
}

/// One journal record, written immediately before its blob. The offset
/// points at the blob and the crc covers the blob bytes, so a torn write
/// of either half is detected during replay.
#[derive(Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct JournalRecord {
    pub(crate) magic: U16<LE>,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) kind: u8,
    pub(crate) reserved: u8,
    pub(crate) offset: U64<LE>,
    pub(crate) length: U64<LE>,
    pub(crate) crc32: U32<LE>,
}

pub(crate) const RECORD_SIZE: usize = mem::size_of::<JournalRecord>();
const_assert_eq!(RECORD_SIZE, 26);

impl JournalRecord {
    pub(crate) fn new(index: FileIndex, offset: u64, data: &[u8]) -> Self {
        Self {
            magic: U16::new(JOURNAL_MAGIC),
            x: index.x,
            y: index.y,
            kind: index.kind,
            reserved: 0,
            offset: U64::new(offset),
            length: U64::new(data.len() as u64),
            crc32: U32::new(crc32(data)),
        }
    }

    pub(crate) fn file_index(&self) -> FileIndex {
        FileIndex::new(self.x, self.y, self.kind)
    }
}

/// One live blob in the index block; same shape as a journal record minus
/// the magic.
#[derive(Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct IndexEntry {
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) kind: u8,
    pub(crate) reserved: u8,
    pub(crate) offset: U64<LE>,
    pub(crate) length: U64<LE>,
    pub(crate) crc32: U32<LE>,
}

pub(crate) const ENTRY_SIZE: usize = mem::size_of::<IndexEntry>();
const_assert_eq!(ENTRY_SIZE, 24);

#[derive(Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct IndexHead {
    pub(crate) magic: U16<LE>,
    pub(crate) count: U32<LE>,
}

pub(crate) const INDEX_HEAD_SIZE: usize = mem::size_of::<IndexHead>();
const_assert_eq!(INDEX_HEAD_SIZE, 6);

#[derive(Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub(crate) struct Trailer {
    pub(crate) magic: [u8; 6],
    pub(crate) index_offset: U64<LE>,
    pub(crate) index_crc32: U32<LE>,
}

pub(crate) const TRAILER_SIZE: usize = mem::size_of::<Trailer>();
const_assert_eq!(TRAILER_SIZE, 18);

pub(crate) fn overlay<'a, T: FromBytes + Unaligned>(data: &'a [u8], what: &str) -> Result<&'a T> {
    if data.len() < mem::size_of::<T>() {
        return Err(Error::format(format!("{} truncated", what)));
    }
    LayoutVerified::<&[u8], T>::new(&data[..mem::size_of::<T>()])
        .map(|view| view.into_ref())
        .ok_or_else(|| Error::format(format!("{} unreadable", what)))
}
