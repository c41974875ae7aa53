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
mod atlas;
mod config;
mod coverage;
mod delivery;
mod encoder;
mod glue;
mod mesh;
mod metanode;
mod navtile;
mod paste;
mod set;
mod tile;
mod wire;

pub use crate::{
    atlas::Atlas,
    config::{HeightMode, Position, PositionKind, TileSetConfig},
    coverage::{coverage_size, rasterize_coverage, COVERAGE_ORDER},
    delivery::{Delivery, MaskFlavor},
    encoder::{Constraints, Encoder, TileGenerator, TileResult},
    glue::create_glue,
    mesh::{Mesh, MeshPayload, SubMesh},
    metanode::{MetaFlags, MetaNode, MetaTile, META_BINARY_ORDER},
    navtile::{NavTile, NAVTILE_SIZE},
    paste::paste,
    set::TileSet,
    tile::Tile,
};
