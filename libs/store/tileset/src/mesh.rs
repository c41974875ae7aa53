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
use crate::{
    coverage::COVERAGE_ORDER,
    wire::{put_f64, put_u16, put_u32, Reader},
};
use nalgebra::{Point2, Point3};
use qtree::RasterMask;
use tiling::{Error, Extents3, Result};

const MESH_MAGIC: [u8; 2] = [b'R', b'M'];
const MESH_VERSION: u16 = 1;

const HAS_ETC: u8 = 0x01;
const HAS_TEXTURE_LAYER: u8 = 0x02;

/// One textured surface patch: vertices in the physical SRS, face-indexed
/// triangles, internal texture coordinates, and optionally external
/// (bound-layer) coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubMesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<[u32; 3]>,
    pub tc: Vec<Point2<f64>>,
    pub etc: Option<Vec<Point2<f64>>>,
    pub texture_layer: Option<u16>,
}

impl SubMesh {
    fn check(&self) -> Result<()> {
        for face in &self.faces {
            for &index in face {
                if index as usize >= self.vertices.len() {
                    return Err(Error::inconsistent(format!(
                        "face vertex {} outside {} vertices",
                        index,
                        self.vertices.len()
                    )));
                }
            }
        }
        if let Some(etc) = &self.etc {
            if etc.len() != self.vertices.len() {
                return Err(Error::inconsistent(
                    "external texture coordinate count differs from vertex count",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub submeshes: Vec<SubMesh>,
}

impl Mesh {
    pub fn single(submesh: SubMesh) -> Self {
        Self {
            submeshes: vec![submesh],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.submeshes.iter().all(|sm| sm.faces.is_empty())
    }

    /// Bounding box of every vertex, inverted for an empty mesh.
    pub fn extents(&self) -> Extents3 {
        let mut out = Extents3::inverted();
        for submesh in &self.submeshes {
            for vertex in &submesh.vertices {
                out.extend_by(vertex);
            }
        }
        out
    }

    /// Vertex z range, (inf, -inf) for an empty mesh.
    pub fn height_range(&self) -> (f64, f64) {
        let extents = self.extents();
        (extents.min().z, extents.max().z)
    }
}

/// What actually lands in the mesh stream: the mesh plus the coverage
/// bitmap of the pixels its triangles own at the default coverage size.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshPayload {
    pub mesh: Mesh,
    pub coverage: RasterMask,
}

impl MeshPayload {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&MESH_MAGIC);
        put_u16(&mut out, MESH_VERSION);
        put_u16(&mut out, self.mesh.submeshes.len() as u16);
        for submesh in &self.mesh.submeshes {
            submesh.check()?;
            let mut flags = 0u8;
            if submesh.etc.is_some() {
                flags |= HAS_ETC;
            }
            if submesh.texture_layer.is_some() {
                flags |= HAS_TEXTURE_LAYER;
            }
            out.push(flags);
            if let Some(layer) = submesh.texture_layer {
                put_u16(&mut out, layer);
            }
            put_u32(&mut out, submesh.vertices.len() as u32);
            for vertex in &submesh.vertices {
                put_f64(&mut out, vertex.x);
                put_f64(&mut out, vertex.y);
                put_f64(&mut out, vertex.z);
            }
            put_u32(&mut out, submesh.tc.len() as u32);
            for tc in &submesh.tc {
                put_f64(&mut out, tc.x);
                put_f64(&mut out, tc.y);
            }
            if let Some(etc) = &submesh.etc {
                for tc in etc {
                    put_f64(&mut out, tc.x);
                    put_f64(&mut out, tc.y);
                }
            }
            put_u32(&mut out, submesh.faces.len() as u32);
            for face in &submesh.faces {
                put_u32(&mut out, face[0]);
                put_u32(&mut out, face[1]);
                put_u32(&mut out, face[2]);
            }
        }
        self.coverage.serialize(&mut out);
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<MeshPayload> {
        let mut reader = Reader::new(data, "mesh payload");
        if reader.bytes(2)? != MESH_MAGIC {
            return Err(Error::format("not a mesh payload"));
        }
        let version = reader.u16()?;
        if version != MESH_VERSION {
            return Err(Error::format(format!(
                "unsupported mesh version {}",
                version
            )));
        }
        let submesh_count = reader.u16()? as usize;
        let mut submeshes = Vec::with_capacity(submesh_count);
        for _ in 0..submesh_count {
            let flags = reader.u8()?;
            let texture_layer = if flags & HAS_TEXTURE_LAYER != 0 {
                Some(reader.u16()?)
            } else {
                None
            };
            let vertex_count = reader.u32()? as usize;
            let mut vertices = Vec::with_capacity(vertex_count);
            for _ in 0..vertex_count {
                let (x, y, z) = (reader.f64()?, reader.f64()?, reader.f64()?);
                vertices.push(Point3::new(x, y, z));
            }
            let tc_count = reader.u32()? as usize;
            let mut tc = Vec::with_capacity(tc_count);
            for _ in 0..tc_count {
                let (u, v) = (reader.f64()?, reader.f64()?);
                tc.push(Point2::new(u, v));
            }
            let etc = if flags & HAS_ETC != 0 {
                let mut etc = Vec::with_capacity(vertex_count);
                for _ in 0..vertex_count {
                    let (u, v) = (reader.f64()?, reader.f64()?);
                    etc.push(Point2::new(u, v));
                }
                Some(etc)
            } else {
                None
            };
            let face_count = reader.u32()? as usize;
            let mut faces = Vec::with_capacity(face_count);
            for _ in 0..face_count {
                faces.push([reader.u32()?, reader.u32()?, reader.u32()?]);
            }
            let submesh = SubMesh {
                vertices,
                faces,
                tc,
                etc,
                texture_layer,
            };
            submesh
                .check()
                .map_err(|_| Error::format("mesh payload has out-of-range face indices"))?;
            submeshes.push(submesh);
        }
        let coverage = RasterMask::deserialize(COVERAGE_ORDER, reader.rest())?;
        Ok(MeshPayload {
            mesh: Mesh { submeshes },
            coverage,
        })
    }
}

// A one-quad submesh over [0,1]^2 with a sloped roof; the fixture most of
// the payload and tile-set tests build on.
#[cfg(test)]
pub(crate) fn quad_submesh() -> SubMesh {
    SubMesh {
        vertices: vec![
            Point3::new(0., 0., 10.),
            Point3::new(1., 0., 12.),
            Point3::new(1., 1., 14.),
            Point3::new(0., 1., 11.),
        ],
        faces: vec![[0, 1, 2], [0, 2, 3]],
        tc: vec![
            Point2::new(0., 0.),
            Point2::new(1., 0.),
            Point2::new(1., 1.),
            Point2::new(0., 1.),
        ],
        etc: None,
        texture_layer: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtree::RasterMask;

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let mut submesh = quad_submesh();
        submesh.texture_layer = Some(3);
        submesh.etc = Some(submesh.tc.clone());
        let mut coverage = RasterMask::empty(COVERAGE_ORDER);
        coverage.fill_rect(0, 0, 128, 256, true);
        let payload = MeshPayload {
            mesh: Mesh::single(submesh),
            coverage,
        };
        let bytes = payload.serialize()?;
        let back = MeshPayload::deserialize(&bytes)?;
        assert_eq!(payload, back);
        Ok(())
    }

    #[test]
    fn test_height_range() {
        let mesh = Mesh::single(quad_submesh());
        let (lo, hi) = mesh.height_range();
        assert_eq!(lo, 10.);
        assert_eq!(hi, 14.);
    }

    #[test]
    fn test_bad_face_index_rejected() {
        let mut submesh = quad_submesh();
        submesh.faces.push([0, 1, 9]);
        let payload = MeshPayload {
            mesh: Mesh::single(submesh),
            coverage: RasterMask::empty(COVERAGE_ORDER),
        };
        assert!(payload.serialize().is_err());
    }

    #[test]
    fn test_truncated_payload_is_format_error() -> anyhow::Result<()> {
        let payload = MeshPayload {
            mesh: Mesh::single(quad_submesh()),
            coverage: RasterMask::full(COVERAGE_ORDER),
        };
        let bytes = payload.serialize()?;
        assert!(matches!(
            MeshPayload::deserialize(&bytes[..bytes.len() / 2]),
            Err(Error::Format(_))
        ));
        Ok(())
    }
}
