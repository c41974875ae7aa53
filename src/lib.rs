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

//! Regolith stores hierarchically tiled 3D terrain surfaces: meshes,
//! texture atlases, navigation height grids, and per-tile metadata,
//! addressed by (lod, x, y) under a geodetic reference frame. The
//! workspace members are re-exported here so applications can depend on
//! the one crate.
//!
//! * [tiling]: tile addressing, lod ranges, extents, errors.
//! * [qtree]: the compressed quadtree and raster masks.
//! * [tileindex]: the per-lod flag index over a whole pyramid.
//! * [refframe]: reference frames, node resolution, the registry.
//! * [tilar]: the journaled, grouped tile archive format.
//! * [driver]: key to byte-stream backends (tilar and loose files).
//! * [tileset]: the tile set itself: CRUD, encoder, paste, glue,
//!   delivery.

pub use driver;
pub use qtree;
pub use refframe;
pub use tilar;
pub use tileindex;
pub use tileset;
pub use tiling;
