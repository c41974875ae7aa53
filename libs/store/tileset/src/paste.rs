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
use crate::set::TileSet;
use driver::{Driver, Key, TileFile};
use log::info;
use tileindex::TileFlags;
use tiling::{Error, LodRange, Result};

/// Bulk-insert whole tile sets into dst, raw payload bytes straight
/// through the drivers with no re-encode. Sources apply in order and a
/// later tile replaces an earlier one wholesale; no warning on overlap.
/// Metatiles are rebuilt from the copied metanodes at the next flush.
pub fn paste(dst: &mut TileSet, sources: &[&TileSet], lod_range: Option<LodRange>) -> Result<()> {
    if !dst.is_writable() {
        return Err(Error::read_only(format!("tile set {}", dst.config.id)));
    }
    let mut copied = 0usize;
    for src in sources {
        for lod in src.index.lod_range().iter() {
            if let Some(filter) = &lod_range {
                if !filter.contains(lod) {
                    continue;
                }
            }
            let mut tiles = Vec::new();
            src.index.traverse(lod, |id, value| {
                if TileFlags::is_material(value) {
                    tiles.push((id, value));
                }
            });
            for (id, value) in tiles {
                for (file, flag) in [
                    (TileFile::Mesh, TileFlags::MESH),
                    (TileFile::Atlas, TileFlags::ATLAS),
                    (TileFile::NavTile, TileFlags::NAVTILE),
                ] {
                    if value & flag.bits() != 0 {
                        let bytes = src.driver.input(Key::Tile(id, file))?;
                        dst.driver.output(Key::Tile(id, file), &bytes)?;
                    }
                }
                // Tile-level last-wins: the incoming payload flags replace
                // the previous tile's entirely.
                let cleared = dst.index.get(id)
                    & !(TileFlags::MATERIAL | TileFlags::ALIEN | TileFlags::REFERENCE).bits();
                dst.index.set(
                    id,
                    cleared
                        | (value
                            & (TileFlags::MATERIAL | TileFlags::ALIEN | TileFlags::REFERENCE)
                                .bits()),
                );
                if let Ok(node) = src.get_metanode(id) {
                    dst.nodes.insert(id, node);
                }
                copied += 1;
            }
        }
    }
    info!(
        "paste into {}: {} tiles from {} sources",
        dst.config.id,
        copied,
        sources.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TileSetConfig,
        mesh::quad_submesh,
        set::TileSet,
        tile::Tile,
        Atlas, Mesh,
    };
    use anyhow::Result;
    use driver::{Driver, Mode, TilarDriver, TilarDriverOptions};
    use refframe::Registry;
    use std::path::Path;
    use tiling::TileId;

    fn open_driver(root: &Path, mode: Mode) -> Result<Box<dyn Driver>> {
        Ok(Box::new(TilarDriver::open(
            root,
            mode,
            TilarDriverOptions::default(),
        )?))
    }

    fn tile_with_marker(marker: u8) -> Tile {
        let mut atlas = Atlas::new();
        atlas.append(vec![marker; 8]);
        Tile::textured(Mesh::single(quad_submesh()), atlas)
    }

    fn build_set(root: &Path, id: &str, tiles: &[TileId], marker: u8) -> Result<TileSet> {
        let registry = Registry::with_default_frames();
        let mut ts = TileSet::create(
            open_driver(root, Mode::Create)?,
            TileSetConfig::new(id, "square"),
            &registry,
        )?;
        for &tile_id in tiles {
            ts.set_tile(tile_id, tile_with_marker(marker), None)?;
        }
        ts.flush()?;
        Ok(ts)
    }

    #[test]
    fn test_disjoint_paste_unions_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = build_set(&dir.path().join("a"), "a", &[TileId::new(2, 0, 0)], 1)?;
        let b = build_set(&dir.path().join("b"), "b", &[TileId::new(4, 9, 9)], 2)?;

        let registry = Registry::with_default_frames();
        let root = dir.path().join("dst");
        let mut dst = TileSet::create(
            open_driver(&root, Mode::Create)?,
            TileSetConfig::new("dst", "square"),
            &registry,
        )?;
        dst.paste(&[&a, &b], None)?;
        dst.flush()?;
        drop(dst);

        let dst = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        // Disjoint lod ranges union.
        assert_eq!(dst.lod_range().min(), Some(2));
        assert_eq!(dst.lod_range().max(), Some(4));
        // Bit-identical payloads.
        assert_eq!(
            dst.driver.input(Key::Tile(TileId::new(2, 0, 0), TileFile::Mesh))?,
            a.driver.input(Key::Tile(TileId::new(2, 0, 0), TileFile::Mesh))?
        );
        assert_eq!(
            dst.driver.input(Key::Tile(TileId::new(4, 9, 9), TileFile::Atlas))?,
            b.driver.input(Key::Tile(TileId::new(4, 9, 9), TileFile::Atlas))?
        );
        Ok(())
    }

    #[test]
    fn test_overlapping_paste_last_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shared = TileId::new(3, 1, 1);
        let a = build_set(
            &dir.path().join("a"),
            "a",
            &[shared, TileId::new(3, 0, 0)],
            1,
        )?;
        let b = build_set(&dir.path().join("b"), "b", &[shared], 2)?;

        let registry = Registry::with_default_frames();
        let root = dir.path().join("dst");
        let mut dst = TileSet::create(
            open_driver(&root, Mode::Create)?,
            TileSetConfig::new("dst", "square"),
            &registry,
        )?;
        dst.paste(&[&a, &b], None)?;
        dst.flush()?;

        // The shared tile carries b's atlas, the a-only tile remains a's.
        assert_eq!(dst.get_atlas(shared)?.image(0)?, &[2u8; 8][..]);
        assert_eq!(dst.get_atlas(TileId::new(3, 0, 0))?.image(0)?, &[1u8; 8][..]);
        Ok(())
    }

    #[test]
    fn test_paste_order_is_commutative_on_disjoint_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = build_set(&dir.path().join("a"), "a", &[TileId::new(2, 1, 0)], 1)?;
        let b = build_set(&dir.path().join("b"), "b", &[TileId::new(2, 2, 3)], 2)?;
        let registry = Registry::with_default_frames();

        let mut ab = TileSet::create(
            open_driver(&dir.path().join("ab"), Mode::Create)?,
            TileSetConfig::new("ab", "square"),
            &registry,
        )?;
        ab.paste(&[&a, &b], None)?;
        ab.flush()?;

        let mut ba = TileSet::create(
            open_driver(&dir.path().join("ba"), Mode::Create)?,
            TileSetConfig::new("ba", "square"),
            &registry,
        )?;
        ba.paste(&[&b, &a], None)?;
        ba.flush()?;

        assert_eq!(ab.index.serialize(), ba.index.serialize());
        for id in [TileId::new(2, 1, 0), TileId::new(2, 2, 3)] {
            assert_eq!(
                ab.driver.input(Key::Tile(id, TileFile::Mesh))?,
                ba.driver.input(Key::Tile(id, TileFile::Mesh))?
            );
        }
        Ok(())
    }

    #[test]
    fn test_lod_filter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = build_set(
            &dir.path().join("a"),
            "a",
            &[TileId::new(2, 0, 0), TileId::new(5, 3, 3)],
            1,
        )?;
        let registry = Registry::with_default_frames();
        let mut dst = TileSet::create(
            open_driver(&dir.path().join("dst"), Mode::Create)?,
            TileSetConfig::new("dst", "square"),
            &registry,
        )?;
        dst.paste(&[&a], Some(LodRange::of(0, 3)))?;
        dst.flush()?;
        assert!(dst.exists(TileId::new(2, 0, 0)));
        assert!(!dst.exists(TileId::new(5, 3, 3)));
        Ok(())
    }
}
