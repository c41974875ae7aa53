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
use crate::tile_id::ChildIndex;
use nalgebra::{Point2, Point3};

/// Axis-aligned box in a subtree SRS. Low y is the lower half of the quad,
/// matching the LowerLeft/UpperLeft child split.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extents2 {
    min: Point2<f64>,
    max: Point2<f64>,
}

impl Extents2 {
    pub fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        debug_assert!(min.x <= max.x && min.y <= max.y);
        Self { min, max }
    }

    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self::new(Point2::new(x_min, y_min), Point2::new(x_max, y_max))
    }

    pub fn min(&self) -> Point2<f64> {
        self.min
    }

    pub fn max(&self) -> Point2<f64> {
        self.max
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            (self.min.x + self.max.x) / 2.,
            (self.min.y + self.max.y) / 2.,
        )
    }

    pub fn size(&self) -> (f64, f64) {
        (self.max.x - self.min.x, self.max.y - self.min.y)
    }

    /// The quadrant of this box covered by the given child: split at the
    /// midpoint, LowerLeft keeping (x_min..x_mid, y_min..y_mid).
    pub fn child(&self, index: ChildIndex) -> Extents2 {
        let mid = self.center();
        match index {
            ChildIndex::LowerLeft => Self::new(self.min, mid),
            ChildIndex::LowerRight => Self::new(
                Point2::new(mid.x, self.min.y),
                Point2::new(self.max.x, mid.y),
            ),
            ChildIndex::UpperLeft => Self::new(
                Point2::new(self.min.x, mid.y),
                Point2::new(mid.x, self.max.y),
            ),
            ChildIndex::UpperRight => Self::new(mid, self.max),
        }
    }

    pub fn overlaps(&self, other: &Extents2) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// True when other lies entirely within this box (boundaries included).
    pub fn encloses(&self, other: &Extents2) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }

    pub fn union(&self, other: &Extents2) -> Extents2 {
        Self::new(
            Point2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            Point2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }
}

/// Geometric extents of tile content in the physical SRS.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extents3 {
    min: Point3<f64>,
    max: Point3<f64>,
}

impl Extents3 {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// An inverted box that unions as the identity.
    pub fn inverted() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn min(&self) -> Point3<f64> {
        self.min
    }

    pub fn max(&self) -> Point3<f64> {
        self.max
    }

    pub fn extend_by(&mut self, p: &Point3<f64>) {
        self.min = Point3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z));
        self.max = Point3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z));
    }

    pub fn union(&self, other: &Extents3) -> Extents3 {
        let mut out = *self;
        if other.is_valid() {
            out.extend_by(&other.min);
            out.extend_by(&other.max);
        }
        out
    }
}
