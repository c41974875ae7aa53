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
use crate::tile_id::Lod;
use std::fmt;

/// Closed interval of lods, with a distinct empty value. The empty range is
/// not a degenerate [min,max]; it compares equal only to itself.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct LodRange {
    bounds: Option<(Lod, Lod)>,
}

impl LodRange {
    pub fn empty() -> Self {
        Self { bounds: None }
    }

    pub fn of(min: Lod, max: Lod) -> Self {
        assert!(min <= max);
        Self {
            bounds: Some((min, max)),
        }
    }

    pub fn single(lod: Lod) -> Self {
        Self::of(lod, lod)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn min(&self) -> Option<Lod> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<Lod> {
        self.bounds.map(|(_, max)| max)
    }

    pub fn contains(&self, lod: Lod) -> bool {
        match self.bounds {
            Some((min, max)) => lod >= min && lod <= max,
            None => false,
        }
    }

    /// Grow the range to cover the given lod.
    pub fn extend_to(&mut self, lod: Lod) {
        self.bounds = match self.bounds {
            Some((min, max)) => Some((min.min(lod), max.max(lod))),
            None => Some((lod, lod)),
        };
    }

    pub fn union(&self, other: &LodRange) -> LodRange {
        match (self.bounds, other.bounds) {
            (Some((a0, a1)), Some((b0, b1))) => LodRange::of(a0.min(b0), a1.max(b1)),
            (Some(_), None) => *self,
            (None, _) => *other,
        }
    }

    /// Ascending lods, empty iterator for the empty range.
    pub fn iter(&self) -> impl Iterator<Item = Lod> {
        let (min, max) = match self.bounds {
            Some((min, max)) => (min as u16, max as u16),
            None => (1, 0),
        };
        (min..=max).map(|lod| lod as Lod)
    }
}

impl fmt::Display for LodRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.bounds {
            Some((min, max)) => write!(f, "{}..{}", min, max),
            None => write!(f, "empty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_distinct() {
        let empty = LodRange::empty();
        assert!(empty.is_empty());
        assert!(!empty.contains(0));
        assert_eq!(empty.iter().count(), 0);
        assert_ne!(empty, LodRange::of(0, 0));
    }

    #[test]
    fn test_extend_and_union() {
        let mut range = LodRange::empty();
        range.extend_to(4);
        range.extend_to(2);
        assert_eq!(range, LodRange::of(2, 4));
        assert_eq!(
            range.union(&LodRange::of(6, 7)),
            LodRange::of(2, 7)
        );
        assert_eq!(range.union(&LodRange::empty()), range);
    }

    #[test]
    fn test_iteration_order() {
        assert_eq!(
            LodRange::of(1, 3).iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
