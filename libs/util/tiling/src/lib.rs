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
mod error;
mod extents;
mod lod_range;
mod runnable;
mod tile_id;

pub use crate::{
    error::{Error, Result},
    extents::{Extents2, Extents3},
    lod_range::LodRange,
    runnable::Runnable,
    tile_id::{ChildIndex, Lod, TileId},
};
