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
use crate::wire::{put_u16, put_u32, Reader};
use tiling::{Error, Result};

const ATLAS_MAGIC: [u8; 2] = [b'R', b'A'];
const ATLAS_VERSION: u16 = 1;

/// Ordered texture images bound to submeshes by position. The images stay
/// encoded (jpeg/png); this store never re-encodes, it only moves blobs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Atlas {
    images: Vec<Vec<u8>>,
}

impl Atlas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, encoded: Vec<u8>) {
        self.images.push(encoded);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, index: usize) -> Result<&[u8]> {
        self.images
            .get(index)
            .map(|blob| blob.as_slice())
            .ok_or_else(|| Error::no_such_file(format!("atlas image {}", index)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.images.iter().map(|blob| blob.as_slice())
    }

    /// Pixel dimensions of one stored image, decoded from the blob header.
    pub fn image_size(&self, index: usize) -> Result<(u32, u32)> {
        use image::GenericImageView;
        let blob = self.image(index)?;
        image::load_from_memory(blob)
            .map(|img| img.dimensions())
            .map_err(|e| Error::format(format!("atlas image {}: {}", index, e)))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ATLAS_MAGIC);
        put_u16(&mut out, ATLAS_VERSION);
        put_u16(&mut out, self.images.len() as u16);
        for blob in &self.images {
            put_u32(&mut out, blob.len() as u32);
            out.extend_from_slice(blob);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Atlas> {
        let mut reader = Reader::new(data, "atlas payload");
        if reader.bytes(2)? != ATLAS_MAGIC {
            return Err(Error::format("not an atlas payload"));
        }
        let version = reader.u16()?;
        if version != ATLAS_VERSION {
            return Err(Error::format(format!(
                "unsupported atlas version {}",
                version
            )));
        }
        let count = reader.u16()? as usize;
        let mut images = Vec::with_capacity(count);
        for _ in 0..count {
            let length = reader.u32()? as usize;
            images.push(reader.bytes(length)?.to_vec());
        }
        Ok(Atlas { images })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let mut atlas = Atlas::new();
        atlas.append(vec![1, 2, 3]);
        atlas.append(Vec::new());
        atlas.append(vec![0xFF; 100]);
        let back = Atlas::deserialize(&atlas.serialize())?;
        assert_eq!(atlas, back);
        assert_eq!(back.image(0)?, &[1, 2, 3]);
        assert!(back.image(3).is_err());
        Ok(())
    }

    #[test]
    fn test_image_size_decodes_png() -> anyhow::Result<()> {
        let mut png = Vec::new();
        let buffer = image::GrayImage::from_pixel(7, 5, image::Luma([128u8]));
        image::DynamicImage::ImageLuma8(buffer)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)?;
        let mut atlas = Atlas::new();
        atlas.append(png);
        assert_eq!(atlas.image_size(0)?, (7, 5));
        Ok(())
    }

    #[test]
    fn test_garbage_image_is_format_error() {
        let mut atlas = Atlas::new();
        atlas.append(vec![1, 2, 3]);
        assert!(matches!(atlas.image_size(0), Err(Error::Format(_))));
    }
}
