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
use crate::flags::TileFlags;
use log::trace;
use qtree::QTree;
use tiling::{Error, Lod, LodRange, Result, TileId};

const MAGIC: [u8; 2] = [b'T', b'I'];
const VERSION: u16 = 1;

/// Mapping TileId -> u32 flags, stored as one quadtree per lod. The tree at
/// lod l spans the full 2^l x 2^l domain, so point queries cost O(l) and
/// bulk operations cost the leaf count, not the tile count.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TileIndex {
    min_lod: Lod,
    trees: Vec<QTree>,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn max_lod(&self) -> Option<Lod> {
        if self.trees.is_empty() {
            None
        } else {
            Some(self.min_lod + (self.trees.len() - 1) as u8)
        }
    }

    fn tree(&self, lod: Lod) -> Option<&QTree> {
        if self.trees.is_empty() || lod < self.min_lod {
            return None;
        }
        self.trees.get((lod - self.min_lod) as usize)
    }

    fn ensure_lod(&mut self, lod: Lod) {
        if self.trees.is_empty() {
            self.min_lod = lod;
            self.trees.push(QTree::new(lod));
            return;
        }
        while lod < self.min_lod {
            self.min_lod -= 1;
            self.trees.insert(0, QTree::new(self.min_lod));
        }
        while (self.min_lod as usize + self.trees.len()) <= lod as usize {
            let next = self.min_lod + self.trees.len() as u8;
            self.trees.push(QTree::new(next));
        }
    }

    pub fn get(&self, id: TileId) -> u32 {
        match self.tree(id.lod()) {
            Some(tree) => tree.get(id.x(), id.y()),
            None => 0,
        }
    }

    pub fn set(&mut self, id: TileId, flags: u32) {
        self.ensure_lod(id.lod());
        self.trees[(id.lod() - self.min_lod) as usize].set(id.x(), id.y(), flags);
    }

    /// Set or clear the masked bits, leaving the rest of the word alone.
    pub fn set_mask(&mut self, id: TileId, mask: TileFlags, on: bool) {
        let current = self.get(id);
        let next = if on {
            current | mask.bits()
        } else {
            current & !mask.bits()
        };
        if next != current {
            self.set(id, next);
        }
    }

    /// A tile exists when it carries material content.
    pub fn exists(&self, id: TileId) -> bool {
        TileFlags::is_material(self.get(id))
    }

    /// The smallest lod range containing any material flag.
    pub fn lod_range(&self) -> LodRange {
        let mut range = LodRange::empty();
        for (offset, tree) in self.trees.iter().enumerate() {
            if tree.count_where(TileFlags::is_material) > 0 {
                range.extend_to(self.min_lod + offset as u8);
            }
        }
        range
    }

    pub fn is_empty(&self) -> bool {
        self.lod_range().is_empty()
    }

    /// The smallest lod range containing any non-zero cell; wider than
    /// `lod_range` once ancestors carry inherited marks.
    pub fn marked_lod_range(&self) -> LodRange {
        let mut range = LodRange::empty();
        for (offset, tree) in self.trees.iter().enumerate() {
            if tree.count_where(|v| v != 0) > 0 {
                range.extend_to(self.min_lod + offset as u8);
            }
        }
        range
    }

    /// Material tile count per lod, for logs and delivery statistics.
    pub fn statistics(&self) -> Vec<(Lod, u64)> {
        self.trees
            .iter()
            .enumerate()
            .map(|(offset, tree)| {
                (
                    self.min_lod + offset as u8,
                    tree.count_where(TileFlags::is_material),
                )
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Visit every non-zero cell at the given lod in row-major order.
    pub fn traverse<F: FnMut(TileId, u32)>(&self, lod: Lod, mut f: F) {
        let tree = match self.tree(lod) {
            Some(tree) => tree,
            None => return,
        };
        let mut cells = Vec::new();
        tree.for_each_quad(
            |v| v != 0,
            |quad| {
                for y in quad.y..quad.y + quad.size {
                    for x in quad.x..quad.x + quad.size {
                        cells.push((y, x, quad.value));
                    }
                }
            },
        );
        cells.sort_unstable_by_key(|&(y, x, _)| (y, x));
        for (y, x, value) in cells {
            f(TileId::new(lod, x, y), value);
        }
    }

    // OR the given flag bits over a cell rectangle at one lod.
    fn or_fill(&mut self, lod: Lod, x0: u32, y0: u32, x1: u32, y1: u32, bits: u32) {
        self.ensure_lod(lod);
        let mut patch = QTree::new(lod);
        patch.fill(x0, y0, x1, y1, bits);
        let slot = (lod - self.min_lod) as usize;
        self.trees[slot] = self.trees[slot].unite(&patch);
    }

    /// Mark the has-children bit on every ancestor of every marked tile,
    /// bottom-up, growing the index to lod 0. Idempotent.
    pub fn make_absolute(&mut self) {
        let max = match self.max_lod() {
            Some(max) => max,
            None => return,
        };
        if max == 0 {
            return;
        }
        self.ensure_lod(0);
        for lod in (1..=max).rev() {
            let mut rects = Vec::new();
            if let Some(tree) = self.tree(lod) {
                tree.for_each_quad(TileFlags::is_marked, |quad| {
                    rects.push((
                        quad.x >> 1,
                        quad.y >> 1,
                        (quad.x + quad.size + 1) >> 1,
                        (quad.y + quad.size + 1) >> 1,
                    ));
                });
            }
            for (x0, y0, x1, y1) in rects {
                self.or_fill(lod - 1, x0, y0, x1, y1, TileFlags::META.bits());
            }
        }
        trace!("make_absolute: {} lods", max + 1);
    }

    /// Propagate the has-children bit from every marked tile down to the
    /// deepest stored lod, top-down. Idempotent.
    pub fn make_complete(&mut self) {
        let max = match self.max_lod() {
            Some(max) => max,
            None => return,
        };
        for lod in self.min_lod..max {
            let mut rects = Vec::new();
            if let Some(tree) = self.tree(lod) {
                tree.for_each_quad(TileFlags::is_marked, |quad| {
                    rects.push((
                        quad.x << 1,
                        quad.y << 1,
                        (quad.x + quad.size) << 1,
                        (quad.y + quad.size) << 1,
                    ));
                });
            }
            for (x0, y0, x1, y1) in rects {
                self.or_fill(lod + 1, x0, y0, x1, y1, TileFlags::META.bits());
            }
        }
    }

    /// Union of absolute and complete.
    pub fn make_full(&mut self) {
        self.make_absolute();
        self.make_complete();
    }

    /// A new index with every tile shifted by (dx, dy) at its own lod and
    /// the whole pyramid moved dl levels (positive = deeper).
    pub fn translated(&self, dx: i64, dy: i64, dl: i8) -> TileIndex {
        let mut out = TileIndex::new();
        for (offset, _) in self.trees.iter().enumerate() {
            let lod = self.min_lod + offset as u8;
            self.traverse(lod, |id, value| {
                out.set(id.translated(dx, dy, dl), value);
            });
        }
        out
    }

    fn combined<F: Fn(u32, u32) -> u32 + Copy>(&self, other: &TileIndex, op: F) -> TileIndex {
        let mut range = LodRange::empty();
        if let Some(max) = self.max_lod() {
            range.extend_to(self.min_lod);
            range.extend_to(max);
        }
        if let Some(max) = other.max_lod() {
            range.extend_to(other.min_lod);
            range.extend_to(max);
        }
        let mut out = TileIndex::new();
        for lod in range.iter() {
            let empty = QTree::new(lod);
            let a = self.tree(lod).unwrap_or(&empty);
            let b = other.tree(lod).unwrap_or(&empty);
            out.ensure_lod(lod);
            out.trees[(lod - out.min_lod) as usize] = a.combined(b, op);
        }
        out
    }

    pub fn unite(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a | b)
    }

    pub fn intersect(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a & b)
    }

    pub fn subtract(&self, other: &TileIndex) -> TileIndex {
        self.combined(other, |a, b| a & !b)
    }

    /// Binary form: a fixed header followed by one length-prefixed quadtree
    /// blob per stored lod. An inverted lod pair in the header encodes an
    /// index with no trees at all.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        match self.max_lod() {
            Some(max) => {
                out.push(self.min_lod);
                out.push(max);
            }
            None => {
                out.push(1);
                out.push(0);
            }
        }
        out.extend_from_slice(&0u16.to_le_bytes());
        for tree in &self.trees {
            let mut blob = Vec::new();
            tree.serialize(&mut blob);
            out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            out.extend_from_slice(&blob);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<TileIndex> {
        if data.len() < 8 || data[0..2] != MAGIC {
            return Err(Error::format("not a tileindex blob"));
        }
        let version = u16::from_le_bytes([data[2], data[3]]);
        if version != VERSION {
            return Err(Error::format(format!(
                "unsupported tileindex version {}",
                version
            )));
        }
        let min_lod = data[4];
        let max_lod = data[5];
        let mut index = TileIndex::new();
        if max_lod < min_lod {
            return Ok(index);
        }
        let mut cursor = 8usize;
        let mut trees = Vec::new();
        for lod in min_lod..=max_lod {
            if cursor + 4 > data.len() {
                return Err(Error::format("tileindex blob truncated"));
            }
            let len = u32::from_le_bytes([
                data[cursor],
                data[cursor + 1],
                data[cursor + 2],
                data[cursor + 3],
            ]) as usize;
            cursor += 4;
            if cursor + len > data.len() {
                return Err(Error::format("tileindex blob truncated"));
            }
            trees.push(QTree::deserialize(lod, &data[cursor..cursor + len])?);
            cursor += len;
        }
        index.min_lod = min_lod;
        index.trees = trees;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(id: TileId) -> u32 {
        (TileFlags::MESH | TileFlags::ATLAS).bits() | (id.lod() as u32) << 8
    }

    fn collect(index: &TileIndex, lod: Lod) -> Vec<TileId> {
        let mut out = Vec::new();
        index.traverse(lod, |id, _| out.push(id));
        out
    }

    #[test]
    fn test_set_get_exists() {
        let mut index = TileIndex::new();
        let id = TileId::new(3, 2, 1);
        assert!(!index.exists(id));
        index.set(id, material(id));
        assert!(index.exists(id));
        assert_eq!(index.get(id), material(id));
        // Neighbors stay clear.
        assert!(!index.exists(TileId::new(3, 1, 2)));
        assert_eq!(index.lod_range(), LodRange::of(3, 3));
    }

    #[test]
    fn test_set_mask() {
        let mut index = TileIndex::new();
        let id = TileId::new(2, 0, 0);
        index.set(id, TileFlags::MESH.bits());
        index.set_mask(id, TileFlags::NAVTILE, true);
        assert_eq!(
            index.get(id),
            (TileFlags::MESH | TileFlags::NAVTILE).bits()
        );
        index.set_mask(id, TileFlags::MESH, false);
        assert_eq!(index.get(id), TileFlags::NAVTILE.bits());
    }

    #[test]
    fn test_make_absolute_ancestor_enumeration() {
        let mut index = TileIndex::new();
        index.set(TileId::new(2, 0, 0), TileFlags::MESH.bits());
        index.set(TileId::new(2, 3, 3), TileFlags::MESH.bits());
        index.make_absolute();

        assert_eq!(collect(&index, 0), vec![TileId::new(0, 0, 0)]);
        assert_eq!(
            collect(&index, 1),
            vec![TileId::new(1, 0, 0), TileId::new(1, 1, 1)]
        );
        assert_eq!(
            collect(&index, 2),
            vec![TileId::new(2, 0, 0), TileId::new(2, 3, 3)]
        );
    }

    #[test]
    fn test_make_absolute_is_idempotent() {
        let mut index = TileIndex::new();
        index.set(TileId::new(4, 9, 6), TileFlags::MESH.bits());
        index.make_absolute();
        let once = index.clone();
        index.make_absolute();
        assert_eq!(index, once);
    }

    #[test]
    fn test_make_full_ancestors_have_children_bit() {
        let mut index = TileIndex::new();
        index.set(TileId::new(3, 5, 2), material(TileId::new(3, 5, 2)));
        index.set(TileId::new(5, 1, 1), material(TileId::new(5, 1, 1)));
        index.make_full();
        for lod in 0..=5u8 {
            index.traverse(lod, |id, _| {
                let mut cursor = id;
                while let Some(parent) = cursor.parent() {
                    assert!(
                        index.get(parent) & TileFlags::META.bits() != 0,
                        "ancestor {} of {} lacks has-children",
                        parent,
                        id
                    );
                    cursor = parent;
                }
            });
        }
    }

    #[test]
    fn test_make_complete_descends_to_max_lod() {
        let mut index = TileIndex::new();
        index.set(TileId::new(1, 0, 0), TileFlags::MESH.bits());
        // Allocate lod 3 so the completion has somewhere to go.
        index.set(TileId::new(3, 7, 7), TileFlags::MESH.bits());
        index.make_complete();
        // Every descendant of (1,0,0) down to lod 3 is marked.
        for id in TileId::new(1, 0, 0).children() {
            assert!(index.get(id) & TileFlags::META.bits() != 0);
            for grandchild in id.children() {
                assert!(index.get(grandchild) & TileFlags::META.bits() != 0);
            }
        }
    }

    #[test]
    fn test_bulk_ops() {
        let mut a = TileIndex::new();
        let mut b = TileIndex::new();
        a.set(TileId::new(2, 0, 0), 0b01);
        a.set(TileId::new(2, 1, 0), 0b01);
        b.set(TileId::new(2, 1, 0), 0b11);
        b.set(TileId::new(3, 0, 0), 0b10);

        let union = a.unite(&b);
        assert_eq!(union.get(TileId::new(2, 0, 0)), 0b01);
        assert_eq!(union.get(TileId::new(2, 1, 0)), 0b11);
        assert_eq!(union.get(TileId::new(3, 0, 0)), 0b10);

        let inter = a.intersect(&b);
        assert_eq!(inter.get(TileId::new(2, 1, 0)), 0b01);
        assert_eq!(inter.get(TileId::new(2, 0, 0)), 0);

        let diff = a.subtract(&b);
        assert_eq!(diff.get(TileId::new(2, 0, 0)), 0b01);
        assert_eq!(diff.get(TileId::new(2, 1, 0)), 0);
    }

    #[test]
    fn test_translate() {
        let mut index = TileIndex::new();
        index.set(TileId::new(2, 1, 1), 0b101);
        let shifted = index.translated(1, 0, 1);
        assert_eq!(shifted.get(TileId::new(3, 4, 2)), 0b101);
        assert_eq!(shifted.lod_range(), LodRange::of(3, 3));
    }

    #[test]
    fn test_serialize_round_trip() -> anyhow::Result<()> {
        let mut index = TileIndex::new();
        index.set(TileId::new(2, 0, 0), material(TileId::new(2, 0, 0)));
        index.set(TileId::new(5, 17, 30), material(TileId::new(5, 17, 30)));
        index.make_absolute();
        let blob = index.serialize();
        let back = TileIndex::deserialize(&blob)?;
        assert_eq!(index, back);
        Ok(())
    }

    #[test]
    fn test_serialize_empty_round_trip() -> anyhow::Result<()> {
        let index = TileIndex::new();
        let back = TileIndex::deserialize(&index.serialize())?;
        assert!(back.is_empty());
        Ok(())
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(TileIndex::deserialize(b"XX\0\0\0\0\0\0").is_err());
        assert!(TileIndex::deserialize(b"TI").is_err());
    }
}
