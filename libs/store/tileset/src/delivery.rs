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
use crate::{config::TileSetConfig, set::TileSet};
use driver::Driver;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, LumaA};
use json::JsonValue;
use log::trace;
use refframe::Registry;
use std::{collections::BTreeSet, io::Cursor, time::SystemTime};
use tileindex::TileFlags;
use tiling::{Error, Result, TileId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaskFlavor {
    Plain,
    /// Absent data renders as a transparent placeholder instead of
    /// failing with NoSuchFile.
    Debug,
}

/// Read-only facade over a flushed tile set that synthesises the derived
/// 2D streams on demand. Nothing here is cached or persisted; every
/// response is a pure function of the underlying store.
pub struct Delivery {
    ts: TileSet,
}

impl Delivery {
    pub fn open(driver: Box<dyn Driver>, registry: &Registry) -> Result<Delivery> {
        Ok(Delivery {
            ts: TileSet::open(driver, registry)?,
        })
    }

    pub fn from_tileset(ts: TileSet) -> Delivery {
        Delivery { ts }
    }

    pub fn tileset(&self) -> &TileSet {
        &self.ts
    }

    /// The externally served config: driver options stripped.
    pub fn config(&self) -> TileSetConfig {
        self.ts.config().stripped()
    }

    /// A 256x256 png summarising the index flags of the subtree under the
    /// given tile: white for material tiles, grey for inherited marks.
    pub fn meta2d(&self, id: TileId) -> Result<Vec<u8>> {
        const EDGE: u32 = 256;
        let index = self.ts.tile_index();
        let max_lod = index.marked_lod_range().max().unwrap_or(0);
        let depth = (max_lod.saturating_sub(id.lod())).min(8);
        let mut image = GrayImage::new(EDGE, EDGE);
        for py in 0..EDGE {
            for px in 0..EDGE {
                let sub_x = (id.x() << depth) + (px >> (8 - depth));
                let sub_y = (id.y() << depth) + (py >> (8 - depth));
                let value = index.get(TileId::new(id.lod() + depth, sub_x, sub_y));
                let luma = if TileFlags::is_material(value) {
                    255
                } else if value != 0 {
                    128
                } else {
                    0
                };
                image.put_pixel(px, py, Luma([luma]));
            }
        }
        trace!("meta2d {} at depth {}", id, depth);
        encode_png(DynamicImage::ImageLuma8(image))
    }

    /// The stored coverage mask as a png.
    pub fn mask(&self, id: TileId, flavor: MaskFlavor) -> Result<Vec<u8>> {
        match self.ts.get_coverage(id) {
            Ok(coverage) => {
                let edge = coverage.size();
                let mut image = GrayImage::new(edge, edge);
                for py in 0..edge {
                    for px in 0..edge {
                        let luma = if coverage.get(px, py) { 255 } else { 0 };
                        image.put_pixel(px, py, Luma([luma]));
                    }
                }
                encode_png(DynamicImage::ImageLuma8(image))
            }
            Err(e) if e.is_not_found() && flavor == MaskFlavor::Debug => {
                let placeholder =
                    image::ImageBuffer::from_pixel(1, 1, LumaA([0u8, 0u8]));
                encode_png(DynamicImage::ImageLumaA8(placeholder))
            }
            Err(e) => Err(e),
        }
    }

    /// The credit set applying under the given tile, serialised as json.
    /// A set with at most one credit answers from its config; otherwise
    /// the overlapping metatiles are consulted, stopping as soon as every
    /// known credit has been observed.
    pub fn credits(&self, id: TileId) -> Result<Vec<u8>> {
        let known = self
            .ts
            .config()
            .credits
            .iter()
            .copied()
            .collect::<BTreeSet<u16>>();
        let seen = if known.len() <= 1 {
            known.clone()
        } else {
            self.collect_subtree_credits(id, &known)?
        };
        let mut array = JsonValue::new_array();
        for credit in seen {
            let mut entry = JsonValue::new_object();
            entry["id"] = credit.into();
            if let Some(full) = self.ts.registry().credit(credit) {
                entry["notice"] = full.notice.clone().into();
            }
            array.push(entry).ok();
        }
        Ok(array.dump().into_bytes())
    }

    fn collect_subtree_credits(&self, id: TileId, known: &BTreeSet<u16>) -> Result<BTreeSet<u16>> {
        let mut seen = BTreeSet::new();
        let index = self.ts.tile_index();
        let meta_edge = 1u32 << self.ts.meta_order();
        let max_lod = match index.marked_lod_range().max() {
            Some(max) => max,
            None => return Ok(seen),
        };
        'lods: for lod in id.lod()..=max_lod {
            let shift = lod - id.lod();
            let x0 = id.x() << shift;
            let y0 = id.y() << shift;
            let edge = 1u32 << shift;
            // Walk the meta blocks overlapping the subtree slice.
            let mut by = y0 & !(meta_edge - 1);
            while by < y0 + edge {
                let mut bx = x0 & !(meta_edge - 1);
                while bx < x0 + edge {
                    let block_id = TileId::new(lod, bx, by);
                    if let Ok(block) = self.ts.get_metatile(block_id) {
                        block.for_each_present(|node_id, node| {
                            let in_x = node_id.x() >= x0 && node_id.x() < x0 + edge;
                            let in_y = node_id.y() >= y0 && node_id.y() < y0 + edge;
                            if in_x && in_y {
                                seen.extend(node.credits.iter().copied());
                            }
                        });
                    }
                    if seen.is_superset(known) {
                        break 'lods;
                    }
                    bx += meta_edge;
                }
                by += meta_edge;
            }
        }
        Ok(seen)
    }

    pub fn last_modified(&self) -> Result<SystemTime> {
        self.ts.last_modified()
    }
}

fn encode_png(image: DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .map_err(|e| Error::internal(format!("png encode: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TileSetConfig, mesh::quad_submesh, tile::Tile, Atlas, Mesh,
    };
    use anyhow::Result;
    use driver::{Mode, TilarDriver, TilarDriverOptions};
    use refframe::{Credit, Registry};
    use smallvec::smallvec;
    use std::path::Path;

    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

    fn registry_with_credits() -> Registry {
        let mut registry = Registry::with_default_frames();
        registry.add_credit(Credit {
            id: 3,
            notice: "heights: survey office".to_owned(),
        });
        registry.add_credit(Credit {
            id: 7,
            notice: "imagery: aerial unit".to_owned(),
        });
        registry
    }

    fn build(root: &Path, registry: &Registry, credits: Vec<u16>) -> Result<Delivery> {
        let mut config = TileSetConfig::new("served", "square");
        config.credits = credits.clone();
        let mut options = JsonValue::new_object();
        options["binaryOrder"] = 5.into();
        config.driver_options = Some(options);
        let mut ts = TileSet::create(
            Box::new(TilarDriver::open(
                root,
                Mode::Create,
                TilarDriverOptions::default(),
            )?),
            config,
            registry,
        )?;
        for (i, id) in [TileId::new(2, 0, 0), TileId::new(2, 3, 1)].iter().enumerate() {
            let mut atlas = Atlas::new();
            atlas.append(vec![0x11; 4]);
            let mut tile = Tile::textured(Mesh::single(quad_submesh()), atlas);
            if let Some(&credit) = credits.get(i) {
                tile.credits = smallvec![credit];
            }
            ts.set_tile(*id, tile, None)?;
        }
        ts.flush()?;
        drop(ts);
        Ok(Delivery::open(
            Box::new(TilarDriver::open(
                root,
                Mode::ReadOnly,
                TilarDriverOptions::default(),
            )?),
            registry,
        )?)
    }

    #[test]
    fn test_config_is_stripped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![])?;
        assert!(delivery.config().driver_options.is_none());
        Ok(())
    }

    #[test]
    fn test_meta2d_renders_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![])?;
        let png = delivery.meta2d(TileId::new(0, 0, 0))?;
        assert_eq!(&png[..4], &PNG_MAGIC);
        // A tile outside any data still renders (all black).
        let empty = delivery.meta2d(TileId::new(2, 1, 3))?;
        assert_eq!(&empty[..4], &PNG_MAGIC);
        Ok(())
    }

    #[test]
    fn test_mask_flavors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![])?;
        let png = delivery.mask(TileId::new(2, 0, 0), MaskFlavor::Plain)?;
        assert_eq!(&png[..4], &PNG_MAGIC);

        // No data: plain fails, debug yields a placeholder.
        let missing = TileId::new(2, 2, 2);
        assert!(matches!(
            delivery.mask(missing, MaskFlavor::Plain),
            Err(Error::NoSuchFile(_))
        ));
        let placeholder = delivery.mask(missing, MaskFlavor::Debug)?;
        assert_eq!(&placeholder[..4], &PNG_MAGIC);
        Ok(())
    }

    #[test]
    fn test_credits_from_config_when_single() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![3])?;
        let body = String::from_utf8(delivery.credits(TileId::new(0, 0, 0))?)?;
        assert!(body.contains("survey office"));
        assert!(!body.contains("aerial unit"));
        Ok(())
    }

    #[test]
    fn test_credits_unioned_from_metatiles() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![3, 7])?;
        // Both tiles sit under the root, so both credits show up.
        let body = String::from_utf8(delivery.credits(TileId::new(0, 0, 0))?)?;
        assert!(body.contains("survey office"));
        assert!(body.contains("aerial unit"));
        // Under the left child only the first tile contributes.
        let left = String::from_utf8(delivery.credits(TileId::new(1, 0, 0))?)?;
        assert!(left.contains("survey office"));
        assert!(!left.contains("aerial unit"));
        Ok(())
    }

    #[test]
    fn test_last_modified_is_recent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = registry_with_credits();
        let delivery = build(&dir.path().join("set"), &registry, vec![])?;
        let modified = delivery.last_modified()?;
        assert!(modified.elapsed().unwrap_or_default().as_secs() < 300);
        Ok(())
    }
}
