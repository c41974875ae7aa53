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
use fxhash::FxHashMap;
use tiling::{Error, Extents2, Result, TileId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Subdivision {
    /// Children split the node extents geometrically at the midpoint.
    Geographic,
    /// Children share the parent's raster and split in pixel space.
    Pixel,
}

/// One node of the reference-frame tree. The node owns the nominal extents
/// of its whole subtree in its SRS; a partial node additionally carries the
/// sub-box that is actually valid.
#[derive(Clone, Debug)]
pub struct RFNode {
    pub id: TileId,
    pub srs: String,
    pub extents: Extents2,
    pub valid_extents: Option<Extents2>,
    pub subdivision: Subdivision,
}

impl RFNode {
    pub fn new(id: TileId, srs: &str, extents: Extents2) -> Self {
        Self {
            id,
            srs: srs.to_owned(),
            extents,
            valid_extents: None,
            subdivision: Subdivision::Geographic,
        }
    }

    pub fn partial(mut self, valid: Extents2) -> Self {
        self.valid_extents = Some(valid);
        self
    }

    pub fn is_partial(&self) -> bool {
        self.valid_extents.is_some()
    }
}

/// Directed tree of RFNodes held in an arena; parent/child relationships
/// are resolved through tile arithmetic on the node ids, so there are no
/// reference cycles to manage.
#[derive(Clone, Debug)]
pub struct ReferenceFrame {
    id: String,
    nodes: Vec<RFNode>,
    by_id: FxHashMap<TileId, usize>,
}

impl ReferenceFrame {
    pub fn new(id: &str, nodes: Vec<RFNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::inconsistent(format!(
                "reference frame {} has no nodes",
                id
            )));
        }
        let mut by_id = FxHashMap::default();
        for (offset, node) in nodes.iter().enumerate() {
            if by_id.insert(node.id, offset).is_some() {
                return Err(Error::inconsistent(format!(
                    "reference frame {} has duplicate node {}",
                    id, node.id
                )));
            }
        }
        // Every non-root node must be reachable from some shallower node.
        for node in &nodes {
            if node.id.is_root() {
                continue;
            }
            let mut cursor = node.id;
            let mut linked = false;
            while let Some(parent) = cursor.parent() {
                if by_id.contains_key(&parent) {
                    linked = true;
                    break;
                }
                cursor = parent;
            }
            if !linked {
                return Err(Error::inconsistent(format!(
                    "reference frame {} node {} is orphaned",
                    id, node.id
                )));
            }
        }
        Ok(Self {
            id: id.to_owned(),
            nodes,
            by_id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nodes(&self) -> &[RFNode] {
        &self.nodes
    }

    pub fn node(&self, id: TileId) -> Option<&RFNode> {
        self.by_id.get(&id).map(|&offset| &self.nodes[offset])
    }

    /// The deepest frame node at or above the given tile: the root of the
    /// subtree the tile lives in.
    pub fn subtree_root(&self, id: TileId) -> Option<&RFNode> {
        let mut cursor = id;
        loop {
            if let Some(node) = self.node(cursor) {
                return Some(node);
            }
            cursor = cursor.parent()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_root() -> RFNode {
        RFNode::new(
            TileId::root(),
            "local",
            Extents2::from_corners(0., 0., 1., 1.),
        )
    }

    #[test]
    fn test_rejects_orphans() {
        let nodes = vec![
            unit_root(),
            RFNode::new(
                TileId::new(2, 3, 3),
                "local-ne",
                Extents2::from_corners(0.75, 0.75, 1., 1.),
            ),
        ];
        assert!(ReferenceFrame::new("ok", nodes).is_ok());

        let orphan = vec![RFNode::new(
            TileId::new(2, 3, 3),
            "adrift",
            Extents2::from_corners(0., 0., 1., 1.),
        )];
        assert!(ReferenceFrame::new("bad", orphan).is_err());
    }

    #[test]
    fn test_subtree_root_picks_deepest() {
        let frame = ReferenceFrame::new(
            "nested",
            vec![
                unit_root(),
                RFNode::new(
                    TileId::new(1, 1, 1),
                    "refined",
                    Extents2::from_corners(0.5, 0.5, 1., 1.),
                ),
            ],
        )
        .unwrap();
        let root = frame.subtree_root(TileId::new(3, 7, 7)).unwrap();
        assert_eq!(root.id, TileId::new(1, 1, 1));
        let other = frame.subtree_root(TileId::new(3, 0, 0)).unwrap();
        assert_eq!(other.id, TileId::root());
    }
}
