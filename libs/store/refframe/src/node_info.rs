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
use crate::frame::ReferenceFrame;
use tiling::{ChildIndex, Error, Extents2, Result, TileId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Validity {
    /// Entirely outside the subtree's valid bounds.
    Invalid,
    /// Straddling the valid boundary.
    Partial,
    Full,
}

/// A materialised view of one tile within its reference-frame subtree: the
/// coordinate contract a generator needs without touching the frame again.
/// This is a value; the frame owns the nodes.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    tile: TileId,
    subtree_root: TileId,
    srs: String,
    extents: Extents2,
    validity: Validity,
}

impl NodeInfo {
    /// Resolve a tile against a frame. Fails only when the tile lies above
    /// every subtree root.
    pub fn for_tile(frame: &ReferenceFrame, tile: TileId) -> Result<NodeInfo> {
        let root = frame.subtree_root(tile).ok_or_else(|| {
            Error::inconsistent(format!("tile {} has no subtree in frame {}", tile, frame.id()))
        })?;
        // Split the root extents along the path root -> tile.
        let mut extents = root.extents;
        for lod in root.id.lod()..tile.lod() {
            let ancestor = tile.ancestor_at(lod + 1);
            extents = extents.child(ancestor.index_in_parent());
        }
        let validity = match &root.valid_extents {
            None => Validity::Full,
            Some(valid) => {
                if valid.encloses(&extents) {
                    Validity::Full
                } else if valid.overlaps(&extents) {
                    Validity::Partial
                } else {
                    Validity::Invalid
                }
            }
        };
        Ok(NodeInfo {
            tile,
            subtree_root: root.id,
            srs: root.srs.clone(),
            extents,
            validity,
        })
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn subtree_root(&self) -> TileId {
        self.subtree_root
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn extents(&self) -> Extents2 {
        self.extents
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn is_valid(&self) -> bool {
        self.validity != Validity::Invalid
    }

    /// The child view one level down. Only defined for valid parents; the
    /// child may cross into a deeper subtree, so resolve through the frame.
    pub fn child(&self, frame: &ReferenceFrame, index: ChildIndex) -> Result<NodeInfo> {
        if !self.is_valid() {
            return Err(Error::inconsistent(format!(
                "child of invalid node {}",
                self.tile
            )));
        }
        Self::for_tile(frame, self.tile.child(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RFNode;
    use approx::assert_relative_eq;

    fn partial_frame() -> ReferenceFrame {
        // Only the left half of the unit square holds data.
        ReferenceFrame::new(
            "half",
            vec![RFNode::new(
                TileId::root(),
                "local",
                Extents2::from_corners(0., 0., 1., 1.),
            )
            .partial(Extents2::from_corners(0., 0., 0.5, 1.))],
        )
        .unwrap()
    }

    #[test]
    fn test_extents_follow_child_splits() -> anyhow::Result<()> {
        let frame = ReferenceFrame::new(
            "unit",
            vec![RFNode::new(
                TileId::root(),
                "local",
                Extents2::from_corners(0., 0., 1., 1.),
            )],
        )?;
        let info = NodeInfo::for_tile(&frame, TileId::new(2, 3, 3))?;
        assert_relative_eq!(info.extents().min().x, 0.75);
        assert_relative_eq!(info.extents().min().y, 0.75);
        assert_relative_eq!(info.extents().max().x, 1.0);
        assert_eq!(info.validity(), Validity::Full);
        Ok(())
    }

    #[test]
    fn test_partial_and_invalid_classification() -> anyhow::Result<()> {
        let frame = partial_frame();
        // Root straddles the valid boundary.
        assert_eq!(
            NodeInfo::for_tile(&frame, TileId::root())?.validity(),
            Validity::Partial
        );
        // Left child is fully inside, right child fully outside.
        assert_eq!(
            NodeInfo::for_tile(&frame, TileId::new(1, 0, 0))?.validity(),
            Validity::Full
        );
        assert_eq!(
            NodeInfo::for_tile(&frame, TileId::new(1, 1, 0))?.validity(),
            Validity::Invalid
        );
        Ok(())
    }

    #[test]
    fn test_child_of_invalid_is_undefined() -> anyhow::Result<()> {
        let frame = partial_frame();
        let invalid = NodeInfo::for_tile(&frame, TileId::new(1, 1, 0))?;
        assert!(invalid.child(&frame, ChildIndex::LowerLeft).is_err());
        Ok(())
    }
}
