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
use crate::tree::{QTree, Quad};
use tiling::Result;

/// Boolean quadtree bitmap. Used for mesh coverage and for single-lod
/// storage index quads; cells hold 0 or 1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RasterMask {
    tree: QTree,
}

impl RasterMask {
    pub fn empty(depth: u8) -> Self {
        Self {
            tree: QTree::new(depth),
        }
    }

    pub fn full(depth: u8) -> Self {
        Self {
            tree: QTree::filled(depth, 1),
        }
    }

    pub fn depth(&self) -> u8 {
        self.tree.depth()
    }

    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.tree.size()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.tree.get(x, y) != 0
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.tree.set(x, y, value as u32);
    }

    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, value: bool) {
        self.tree.fill(x0, y0, x1, y1, value as u32);
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// True when every pixel is set.
    pub fn is_full(&self) -> bool {
        self.tree == QTree::filled(self.tree.depth(), 1)
    }

    /// Number of set pixels.
    pub fn count(&self) -> u64 {
        self.tree.count_where(|v| v != 0)
    }

    pub fn inverted(&self) -> RasterMask {
        Self {
            tree: self
                .tree
                .combined(&QTree::filled(self.tree.depth(), 1), |a, _| (a == 0) as u32),
        }
    }

    pub fn unite(&self, other: &RasterMask) -> RasterMask {
        Self {
            tree: self.tree.unite(&other.tree),
        }
    }

    pub fn intersect(&self, other: &RasterMask) -> RasterMask {
        Self {
            tree: self.tree.intersect(&other.tree),
        }
    }

    pub fn subtract(&self, other: &RasterMask) -> RasterMask {
        Self {
            tree: self.tree.subtract(&other.tree),
        }
    }

    /// Maximal set squares in quadrant-ascending order.
    pub fn for_each_set_quad<F: FnMut(Quad)>(&self, f: F) {
        self.tree.for_each_quad(|v| v != 0, f);
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.tree.serialize(out);
    }

    pub fn deserialize(depth: u8, data: &[u8]) -> Result<RasterMask> {
        Ok(Self {
            tree: QTree::deserialize(depth, data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_empty() {
        let mut mask = RasterMask::empty(8);
        assert!(mask.is_empty());
        assert!(!mask.is_full());
        mask.fill_rect(0, 0, 256, 256, true);
        assert!(mask.is_full());
        assert_eq!(mask.count(), 256 * 256);
    }

    #[test]
    fn test_invert() {
        let mut mask = RasterMask::empty(4);
        mask.fill_rect(0, 0, 8, 16, true);
        let inv = mask.inverted();
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(mask.get(x, y), !inv.get(x, y));
            }
        }
        assert_eq!(mask.count() + inv.count(), 256);
    }

    #[test]
    fn test_leak_through_composition() {
        // The glue question: where does a lower-priority mask show through?
        let mut top = RasterMask::empty(4);
        top.fill_rect(0, 0, 8, 8, true);
        let mut bottom = RasterMask::empty(4);
        bottom.fill_rect(4, 4, 12, 12, true);
        let leaked = bottom.intersect(&top.inverted());
        assert!(leaked.get(8, 8));
        assert!(leaked.get(11, 5));
        assert!(!leaked.get(5, 5));
        assert_eq!(leaked.count(), 8 * 8 - 4 * 4);
    }
}
