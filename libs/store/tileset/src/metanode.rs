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
use crate::wire::{put_f32, put_u16, put_u32, put_varint, Reader};
use bitflags::bitflags;
use nalgebra::Point3;
use smallvec::SmallVec;
use tiling::{ChildIndex, Error, Extents3, Result, TileId};

/// Metatiles pack (2^order)^2 nodes; 32 x 32 by default.
pub const META_BINARY_ORDER: u8 = 5;

const META_MAGIC: [u8; 2] = [b'M', b'T'];
const META_VERSION: u16 = 1;

bitflags! {
    /// Per-node summary flags; zero means the node is absent.
    pub struct MetaFlags: u8 {
        const HAS_MESH     = 0x01;
        const HAS_ATLAS    = 0x02;
        const HAS_NAVTILE  = 0x04;
        const HAS_CHILD_LL = 0x08;
        const HAS_CHILD_LR = 0x10;
        const HAS_CHILD_UL = 0x20;
        const HAS_CHILD_UR = 0x40;

        const HAS_CHILDREN = Self::HAS_CHILD_LL.bits
            | Self::HAS_CHILD_LR.bits
            | Self::HAS_CHILD_UL.bits
            | Self::HAS_CHILD_UR.bits;
    }
}

impl MetaFlags {
    pub fn child(index: ChildIndex) -> MetaFlags {
        match index {
            ChildIndex::LowerLeft => Self::HAS_CHILD_LL,
            ChildIndex::LowerRight => Self::HAS_CHILD_LR,
            ChildIndex::UpperLeft => Self::HAS_CHILD_UL,
            ChildIndex::UpperRight => Self::HAS_CHILD_UR,
        }
    }
}

/// The per-tile metadata record delivered to viewers: summary flags,
/// geometric extents, texture resolution, height range, glue provenance,
/// and the credit set.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaNode {
    pub flags: MetaFlags,
    pub extents: Extents3,
    pub texel_size: f32,
    pub display_size: u16,
    pub height_range: (f32, f32),
    /// 1-based rank of the contributing source in a glue, 0 outside glues.
    pub reference: u16,
    pub credits: SmallVec<[u16; 4]>,
}

impl Default for MetaNode {
    fn default() -> Self {
        Self {
            flags: MetaFlags::empty(),
            extents: Extents3::inverted(),
            texel_size: 0.,
            display_size: 256,
            height_range: (f32::INFINITY, f32::NEG_INFINITY),
            reference: 0,
            credits: SmallVec::new(),
        }
    }
}

impl MetaNode {
    pub fn is_present(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn has_mesh(&self) -> bool {
        self.flags.contains(MetaFlags::HAS_MESH)
    }

    pub fn has_children(&self) -> bool {
        self.flags.intersects(MetaFlags::HAS_CHILDREN)
    }

    /// Union another node's height range into this one.
    pub fn merge_height_range(&mut self, range: (f32, f32)) {
        if range.0 <= range.1 {
            self.height_range.0 = self.height_range.0.min(range.0);
            self.height_range.1 = self.height_range.1.max(range.1);
        }
    }

    fn valid_height_range(&self) -> bool {
        self.height_range.0 <= self.height_range.1
    }
}

/// A block of metanodes at one lod, origin aligned to the meta grid.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaTile {
    origin: TileId,
    order: u8,
    nodes: Vec<Option<MetaNode>>,
}

impl MetaTile {
    pub fn new(origin: TileId, order: u8) -> Self {
        assert_eq!(origin, origin.meta_id(order), "origin must be aligned");
        let edge = 1usize << order;
        Self {
            origin,
            order,
            nodes: vec![None; edge * edge],
        }
    }

    pub fn origin(&self) -> TileId {
        self.origin
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    fn edge(&self) -> usize {
        1usize << self.order
    }

    fn slot(&self, id: TileId) -> Result<usize> {
        if id.lod() != self.origin.lod() || id.meta_id(self.order) != self.origin {
            return Err(Error::inconsistent(format!(
                "tile {} outside metatile {}",
                id, self.origin
            )));
        }
        let dx = (id.x() - self.origin.x()) as usize;
        let dy = (id.y() - self.origin.y()) as usize;
        Ok(dy * self.edge() + dx)
    }

    pub fn set(&mut self, id: TileId, node: MetaNode) -> Result<()> {
        let slot = self.slot(id)?;
        self.nodes[slot] = if node.is_present() { Some(node) } else { None };
        Ok(())
    }

    pub fn get(&self, id: TileId) -> Result<Option<&MetaNode>> {
        let slot = self.slot(id)?;
        Ok(self.nodes[slot].as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|node| node.is_none())
    }

    pub fn for_each_present<F: FnMut(TileId, &MetaNode)>(&self, mut f: F) {
        let edge = self.edge();
        for (slot, node) in self.nodes.iter().enumerate() {
            if let Some(node) = node {
                let id = TileId::new(
                    self.origin.lod(),
                    self.origin.x() + (slot % edge) as u32,
                    self.origin.y() + (slot / edge) as u32,
                );
                f(id, node);
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&META_MAGIC);
        put_u16(&mut out, META_VERSION);
        out.push(self.order);
        out.push(self.origin.lod());
        put_u32(&mut out, self.origin.x());
        put_u32(&mut out, self.origin.y());
        let mut mask = 0u32;
        for node in self.nodes.iter().flatten() {
            mask |= node.flags.bits() as u32;
        }
        put_u32(&mut out, mask);
        for node in &self.nodes {
            match node {
                None => out.push(0),
                Some(node) => {
                    out.push(node.flags.bits());
                    let range = if node.valid_height_range() {
                        node.height_range
                    } else {
                        (0., 0.)
                    };
                    put_f32(&mut out, range.0);
                    put_f32(&mut out, range.1);
                    let (min, max) = if node.extents.is_valid() {
                        (node.extents.min(), node.extents.max())
                    } else {
                        (Point3::origin(), Point3::origin())
                    };
                    for v in [min.x, min.y, min.z, max.x, max.y, max.z] {
                        put_f32(&mut out, v as f32);
                    }
                    put_f32(&mut out, node.texel_size);
                    put_u16(&mut out, node.display_size);
                    put_u16(&mut out, node.reference);
                    put_varint(&mut out, node.credits.len() as u32);
                    for &credit in &node.credits {
                        put_varint(&mut out, credit as u32);
                    }
                }
            }
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<MetaTile> {
        let mut reader = Reader::new(data, "metatile payload");
        if reader.bytes(2)? != META_MAGIC {
            return Err(Error::format("not a metatile payload"));
        }
        let version = reader.u16()?;
        if version != META_VERSION {
            return Err(Error::format(format!(
                "unsupported metatile version {}",
                version
            )));
        }
        let order = reader.u8()?;
        if order > 8 {
            return Err(Error::format(format!("implausible metatile order {}", order)));
        }
        let lod = reader.u8()?;
        let x = reader.u32()?;
        let y = reader.u32()?;
        let _flags_mask = reader.u32()?;
        let origin = TileId::new(lod, x, y);
        if origin.meta_id(order) != origin {
            return Err(Error::format("metatile origin not grid aligned"));
        }
        let mut tile = MetaTile::new(origin, order);
        let edge = 1usize << order;
        for slot in 0..edge * edge {
            let flag_bits = reader.u8()?;
            if flag_bits == 0 {
                continue;
            }
            let flags = MetaFlags::from_bits(flag_bits).ok_or_else(|| {
                Error::format(format!("unknown metanode flags {:#04x}", flag_bits))
            })?;
            let height_range = (reader.f32()?, reader.f32()?);
            let mut corners = [0f32; 6];
            for corner in &mut corners {
                *corner = reader.f32()?;
            }
            let extents = Extents3::new(
                Point3::new(corners[0] as f64, corners[1] as f64, corners[2] as f64),
                Point3::new(corners[3] as f64, corners[4] as f64, corners[5] as f64),
            );
            let texel_size = reader.f32()?;
            let display_size = reader.u16()?;
            let reference = reader.u16()?;
            let credit_count = reader.varint()? as usize;
            let mut credits = SmallVec::new();
            for _ in 0..credit_count {
                credits.push(reader.varint()? as u16);
            }
            tile.nodes[slot] = Some(MetaNode {
                flags,
                extents,
                texel_size,
                display_size,
                height_range,
                reference,
                credits,
            });
        }
        Ok(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn sample_node() -> MetaNode {
        MetaNode {
            flags: MetaFlags::HAS_MESH | MetaFlags::HAS_ATLAS | MetaFlags::HAS_CHILD_LL,
            extents: Extents3::new(Point3::new(0., 0., 10.), Point3::new(1., 1., 14.)),
            texel_size: 0.25,
            display_size: 256,
            height_range: (10., 14.),
            reference: 2,
            credits: smallvec![3, 9],
        }
    }

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let origin = TileId::new(7, 32, 64);
        let mut tile = MetaTile::new(origin, META_BINARY_ORDER);
        tile.set(TileId::new(7, 33, 64), sample_node())?;
        tile.set(TileId::new(7, 63, 95), sample_node())?;
        let back = MetaTile::deserialize(&tile.serialize())?;
        assert_eq!(tile, back);
        assert!(back.get(TileId::new(7, 33, 64))?.is_some());
        assert!(back.get(TileId::new(7, 34, 64))?.is_none());
        Ok(())
    }

    #[test]
    fn test_out_of_block_access_rejected() {
        let mut tile = MetaTile::new(TileId::new(7, 32, 64), META_BINARY_ORDER);
        assert!(tile.set(TileId::new(7, 0, 0), sample_node()).is_err());
        assert!(tile.set(TileId::new(6, 33, 64), sample_node()).is_err());
    }

    #[test]
    fn test_absent_nodes_cost_one_byte() {
        let tile = MetaTile::new(TileId::new(6, 0, 0), META_BINARY_ORDER);
        let edge = 1usize << META_BINARY_ORDER;
        // Header: magic + version + order + tile id + flags mask.
        let header = 2 + 2 + 1 + 1 + 4 + 4 + 4;
        assert_eq!(tile.serialize().len(), header + edge * edge);
    }

    #[test]
    fn test_height_range_merge() {
        let mut node = MetaNode::default();
        node.merge_height_range((5., 9.));
        node.merge_height_range((2., 3.));
        node.merge_height_range((f32::INFINITY, f32::NEG_INFINITY)); // ignored
        assert_eq!(node.height_range, (2., 9.));
    }
}
