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

// A tilar file groups the tiles of one super-tile (2^B x 2^B tiles, F
// payload slots per tile) into a single append-only archive. Every write
// lands as a journal record followed by the blob, so the last consistent
// view is always recoverable by replaying the journal; flush() appends a
// fresh index block and publishes it through an atomically replaced
// trailer at the end of the file.
mod archive;
mod crc32;
mod format;
mod lock;

pub use crate::{
    archive::{OpenMode, Tilar},
    format::{FileIndex, Options},
};
