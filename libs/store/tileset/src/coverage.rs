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
use crate::mesh::Mesh;
use qtree::RasterMask;
use tiling::Extents2;

/// Coverage masks are square with this quadtree depth.
pub const COVERAGE_ORDER: u8 = 8;

pub fn coverage_size() -> u32 {
    1 << COVERAGE_ORDER
}

/// Rasterise the mesh triangles into a coverage bitmap over the tile's 2D
/// extents. A pixel is covered when its center lies in any triangle,
/// sampled in the tile's SRS with y growing upward.
pub fn rasterize_coverage(mesh: &Mesh, extents: &Extents2) -> RasterMask {
    let size = coverage_size();
    let mut mask = RasterMask::empty(COVERAGE_ORDER);
    let (width, height) = extents.size();
    if width <= 0. || height <= 0. {
        return mask;
    }
    let origin = extents.min();
    let to_px = |x: f64| (x - origin.x) / width * size as f64;
    let to_py = |y: f64| (y - origin.y) / height * size as f64;

    for submesh in &mesh.submeshes {
        for face in &submesh.faces {
            let a = submesh.vertices[face[0] as usize];
            let b = submesh.vertices[face[1] as usize];
            let c = submesh.vertices[face[2] as usize];
            let tri = [
                (to_px(a.x), to_py(a.y)),
                (to_px(b.x), to_py(b.y)),
                (to_px(c.x), to_py(c.y)),
            ];
            fill_triangle(&mut mask, size, &tri);
        }
    }
    mask
}

// Pixel-center-in-triangle over the triangle's bounding box; sign-agnostic
// so winding does not matter.
fn fill_triangle(mask: &mut RasterMask, size: u32, tri: &[(f64, f64); 3]) {
    let min_x = tri.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = tri.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = tri.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = tri.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let x0 = min_x.floor().max(0.) as u32;
    let y0 = min_y.floor().max(0.) as u32;
    let x1 = (max_x.ceil().min(size as f64) as u32).min(size);
    let y1 = (max_y.ceil().min(size as f64) as u32).min(size);

    for py in y0..y1 {
        for px in x0..x1 {
            let point = (px as f64 + 0.5, py as f64 + 0.5);
            if point_in_triangle(point, tri) {
                mask.set(px, py, true);
            }
        }
    }
}

fn point_in_triangle(p: (f64, f64), tri: &[(f64, f64); 3]) -> bool {
    let sign = |a: (f64, f64), b: (f64, f64)| {
        (p.0 - b.0) * (a.1 - b.1) - (a.0 - b.0) * (p.1 - b.1)
    };
    let d0 = sign(tri[0], tri[1]);
    let d1 = sign(tri[1], tri[2]);
    let d2 = sign(tri[2], tri[0]);
    let has_neg = d0 < 0. || d1 < 0. || d2 < 0.;
    let has_pos = d0 > 0. || d1 > 0. || d2 > 0.;
    !(has_neg && has_pos)
}
