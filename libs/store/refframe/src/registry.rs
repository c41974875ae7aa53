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
use crate::frame::{RFNode, ReferenceFrame};
use std::collections::BTreeMap;
use tiling::{Error, Extents2, Result, TileId};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credit {
    pub id: u16,
    pub notice: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundLayer {
    pub id: u16,
    pub url: String,
}

/// Read-mostly lookup of reference frames, credits, and bound layers. There
/// is deliberately no process-wide instance; a registry is threaded into
/// each tile set at open time and treated as immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    frames: BTreeMap<String, ReferenceFrame>,
    credits: BTreeMap<u16, Credit>,
    bound_layers: BTreeMap<u16, BoundLayer>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the frames the test suites run against: a plain
    /// unit-square frame and one whose root is valid only on the left half.
    pub fn with_default_frames() -> Self {
        let mut registry = Self::empty();
        let square = ReferenceFrame::new(
            "square",
            vec![RFNode::new(
                TileId::root(),
                "local",
                Extents2::from_corners(0., 0., 1., 1.),
            )],
        )
        .expect("static frame");
        let half = ReferenceFrame::new(
            "square-half",
            vec![RFNode::new(
                TileId::root(),
                "local",
                Extents2::from_corners(0., 0., 1., 1.),
            )
            .partial(Extents2::from_corners(0., 0., 0.5, 1.))],
        )
        .expect("static frame");
        registry.add_frame(square);
        registry.add_frame(half);
        registry
    }

    pub fn add_frame(&mut self, frame: ReferenceFrame) {
        self.frames.insert(frame.id().to_owned(), frame);
    }

    pub fn frame(&self, id: &str) -> Result<&ReferenceFrame> {
        self.frames
            .get(id)
            .ok_or_else(|| Error::no_such_file(format!("reference frame {}", id)))
    }

    pub fn add_credit(&mut self, credit: Credit) {
        self.credits.insert(credit.id, credit);
    }

    pub fn credit(&self, id: u16) -> Option<&Credit> {
        self.credits.get(&id)
    }

    pub fn add_bound_layer(&mut self, layer: BoundLayer) {
        self.bound_layers.insert(layer.id, layer);
    }

    pub fn bound_layer(&self, id: u16) -> Option<&BoundLayer> {
        self.bound_layers.get(&id)
    }
}
