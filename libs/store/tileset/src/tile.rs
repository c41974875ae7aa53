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
use crate::{atlas::Atlas, mesh::Mesh, navtile::NavTile};
use qtree::RasterMask;
use smallvec::SmallVec;

/// Everything one set_tile call can carry. A tile with a mesh must also
/// carry an atlas unless it is an alien sentinel standing in for geometry
/// owned by another set.
#[derive(Clone, Debug, Default)]
pub struct Tile {
    pub mesh: Mesh,
    pub atlas: Option<Atlas>,
    pub navtile: Option<NavTile>,
    /// Computed from the mesh and node extents when not supplied.
    pub coverage: Option<RasterMask>,
    pub credits: SmallVec<[u16; 2]>,
    pub alien: bool,
}

impl Tile {
    pub fn textured(mesh: Mesh, atlas: Atlas) -> Self {
        Self {
            mesh,
            atlas: Some(atlas),
            ..Default::default()
        }
    }
}
