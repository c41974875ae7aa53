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
use bitflags::bitflags;

bitflags! {
    /// Per-tile flag word. The low eight bits are reserved by the store;
    /// the remaining 24 are free for traversal bookkeeping and are never
    /// interpreted by the engine.
    pub struct TileFlags: u32 {
        const MESH       = 0x01;
        const ATLAS      = 0x02;
        const NAVTILE    = 0x04;
        // Set when the subtree below (or the tile itself) carries content;
        // this is both the metatile presence flag and the has-children bit,
        // which are equal by construction.
        const META       = 0x08;
        const REFERENCE  = 0x10;
        const INFLUENCED = 0x20;
        const ALIEN      = 0x40;
        const COMPOUND   = 0x80;

        const MATERIAL = Self::MESH.bits | Self::ATLAS.bits | Self::NAVTILE.bits;
        const RESERVED = 0xFF;
    }
}

impl TileFlags {
    pub fn is_material(value: u32) -> bool {
        value & Self::MATERIAL.bits != 0
    }

    /// Material content or an inherited has-children mark.
    pub fn is_marked(value: u32) -> bool {
        value & (Self::MATERIAL.bits | Self::META.bits) != 0
    }
}
