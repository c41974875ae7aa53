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
use std::fmt;
use tiling::TileId;

/// The per-tile payload streams a driver can hold.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TileFile {
    Mesh,
    Atlas,
    NavTile,
    Meta,
}

impl TileFile {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Atlas => "atlas",
            Self::NavTile => "nav",
            Self::Meta => "meta",
        }
    }

    /// Slot index inside a tile archive; Meta lives in its own archives.
    pub fn archive_kind(&self) -> u8 {
        match self {
            Self::Mesh => 0,
            Self::Atlas => 1,
            Self::NavTile => 2,
            Self::Meta => 0,
        }
    }

    pub fn all() -> [TileFile; 4] {
        [Self::Mesh, Self::Atlas, Self::NavTile, Self::Meta]
    }
}

/// The per-tileset bookkeeping files.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FileType {
    Config,
    TileIndex,
    Registry,
}

impl FileType {
    pub fn filename(&self) -> &'static str {
        match self {
            Self::Config => "config.json",
            Self::TileIndex => "tileset.index",
            Self::Registry => "registry.json",
        }
    }
}

/// A driver key: either one payload stream of one tile, or one named
/// bookkeeping file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Key {
    Tile(TileId, TileFile),
    File(FileType),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tile(id, file) => write!(f, "{}.{}", id, file.extension()),
            Self::File(file) => write!(f, "{}", file.filename()),
        }
    }
}
