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
use crate::wire::{put_f32, put_u16, Reader};
use float_ord::FloatOrd;
use tiling::{Error, Result};

/// Samples per navtile axis.
pub const NAVTILE_SIZE: usize = 256;

const NAVTILE_MAGIC: [u8; 2] = [b'R', b'N'];
const NAVTILE_VERSION: u16 = 1;

/// The coarse height grid navigation clients consume: a fixed-size f32
/// raster with its sampled height range. Row-major, low rows south.
#[derive(Clone, Debug, PartialEq)]
pub struct NavTile {
    heights: Vec<f32>,
    range: (f32, f32),
}

impl NavTile {
    pub fn from_heights(heights: Vec<f32>) -> Result<NavTile> {
        if heights.len() != NAVTILE_SIZE * NAVTILE_SIZE {
            return Err(Error::inconsistent(format!(
                "navtile expects {} samples, got {}",
                NAVTILE_SIZE * NAVTILE_SIZE,
                heights.len()
            )));
        }
        let finite = heights.iter().copied().filter(|h| h.is_finite());
        let lo = finite.clone().min_by_key(|&h| FloatOrd(h));
        let hi = finite.max_by_key(|&h| FloatOrd(h));
        let range = match (lo, hi) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Err(Error::inconsistent(
                    "navtile holds no finite height samples",
                ))
            }
        };
        Ok(NavTile { heights, range })
    }

    pub fn flat(height: f32) -> NavTile {
        NavTile {
            heights: vec![height; NAVTILE_SIZE * NAVTILE_SIZE],
            range: (height, height),
        }
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn sample(&self, x: usize, y: usize) -> f32 {
        self.heights[y * NAVTILE_SIZE + x]
    }

    /// (min, max) over the finite samples.
    pub fn range(&self) -> (f32, f32) {
        self.range
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(2 + 2 + 2 + 8 + NAVTILE_SIZE * NAVTILE_SIZE * 4);
        out.extend_from_slice(&NAVTILE_MAGIC);
        put_u16(&mut out, NAVTILE_VERSION);
        put_u16(&mut out, NAVTILE_SIZE as u16);
        put_f32(&mut out, self.range.0);
        put_f32(&mut out, self.range.1);
        for &height in &self.heights {
            put_f32(&mut out, height);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<NavTile> {
        let mut reader = Reader::new(data, "navtile payload");
        if reader.bytes(2)? != NAVTILE_MAGIC {
            return Err(Error::format("not a navtile payload"));
        }
        let version = reader.u16()?;
        if version != NAVTILE_VERSION {
            return Err(Error::format(format!(
                "unsupported navtile version {}",
                version
            )));
        }
        let size = reader.u16()? as usize;
        if size != NAVTILE_SIZE {
            return Err(Error::format(format!("unsupported navtile size {}", size)));
        }
        let range = (reader.f32()?, reader.f32()?);
        let mut heights = Vec::with_capacity(NAVTILE_SIZE * NAVTILE_SIZE);
        for _ in 0..NAVTILE_SIZE * NAVTILE_SIZE {
            heights.push(reader.f32()?);
        }
        Ok(NavTile { heights, range })
    }
}
