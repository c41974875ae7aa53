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
    atlas::Atlas,
    config::TileSetConfig,
    coverage::{coverage_size, rasterize_coverage},
    mesh::{Mesh, MeshPayload},
    metanode::{MetaFlags, MetaNode, MetaTile, META_BINARY_ORDER},
    navtile::NavTile,
    tile::Tile,
};
use driver::{Driver, FileType, Key, TileFile};
use fxhash::FxHashMap;
use json::JsonValue;
use log::{debug, info};
use qtree::RasterMask;
use refframe::{NodeInfo, Registry};
use smallvec::SmallVec;
use tileindex::{TileFlags, TileIndex};
use tiling::{ChildIndex, Error, LodRange, Result, TileId};

/// A populated pyramid of tiles behind one driver: payload streams, the
/// tile index, and per-tile metadata. Writers go through set_tile /
/// set_navtile and must flush before the set is readable; a flushed set
/// reopened read-write re-enters the populated state.
pub struct TileSet {
    pub(crate) driver: Box<dyn Driver>,
    pub(crate) registry: Registry,
    pub(crate) config: TileSetConfig,
    pub(crate) index: TileIndex,
    // Metanode content produced since the last flush; merged over stored
    // metatiles when the pyramid is rebuilt.
    pub(crate) nodes: FxHashMap<TileId, MetaNode>,
    writable: bool,
    meta_order: u8,
}

impl TileSet {
    /// Stand up an empty tile set over a freshly created driver.
    pub fn create(
        driver: Box<dyn Driver>,
        config: TileSetConfig,
        registry: &Registry,
    ) -> Result<TileSet> {
        if driver.capabilities().read_only {
            return Err(Error::read_only(format!(
                "cannot create tile set {} on a read-only driver",
                config.id
            )));
        }
        // The reference frame must resolve now, not at first set_tile.
        registry.frame(&config.reference_frame)?;
        Ok(TileSet {
            driver,
            registry: registry.clone(),
            config,
            index: TileIndex::new(),
            nodes: FxHashMap::default(),
            writable: true,
            meta_order: META_BINARY_ORDER,
        })
    }

    /// Open a flushed tile set; write access follows the driver's
    /// capabilities.
    pub fn open(driver: Box<dyn Driver>, registry: &Registry) -> Result<TileSet> {
        let config = TileSetConfig::deserialize(&driver.input(Key::File(FileType::Config))?)?;
        registry.frame(&config.reference_frame)?;
        let index = TileIndex::deserialize(&driver.input(Key::File(FileType::TileIndex))?)?;
        let writable = !driver.capabilities().read_only;
        debug!(
            "tileset open {} (lods {}, writable {})",
            config.id,
            index.lod_range(),
            writable
        );
        Ok(TileSet {
            driver,
            registry: registry.clone(),
            config,
            index,
            nodes: FxHashMap::default(),
            writable,
            meta_order: META_BINARY_ORDER,
        })
    }

    pub fn config(&self) -> &TileSetConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn meta_order(&self) -> u8 {
        self.meta_order
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lod_range(&self) -> LodRange {
        self.index.lod_range()
    }

    pub fn exists(&self, id: TileId) -> bool {
        self.index.exists(id)
    }

    pub fn tile_index(&self) -> &TileIndex {
        &self.index
    }

    /// Resolve the coordinate contract for one tile against this set's
    /// reference frame.
    pub fn node_info(&self, id: TileId) -> Result<NodeInfo> {
        NodeInfo::for_tile(self.registry.frame(&self.config.reference_frame)?, id)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::read_only(format!("tile set {}", self.config.id)))
        }
    }

    fn checked_input(&self, id: TileId, file: TileFile, flag: TileFlags) -> Result<Vec<u8>> {
        if self.index.get(id) & flag.bits() == 0 {
            return Err(Error::no_such_file(format!("{}", Key::Tile(id, file))));
        }
        self.driver.input(Key::Tile(id, file))
    }

    pub fn mesh_payload(&self, id: TileId) -> Result<MeshPayload> {
        MeshPayload::deserialize(&self.checked_input(id, TileFile::Mesh, TileFlags::MESH)?)
    }

    pub fn get_mesh(&self, id: TileId) -> Result<Mesh> {
        Ok(self.mesh_payload(id)?.mesh)
    }

    pub fn get_coverage(&self, id: TileId) -> Result<RasterMask> {
        Ok(self.mesh_payload(id)?.coverage)
    }

    pub fn get_atlas(&self, id: TileId) -> Result<Atlas> {
        Atlas::deserialize(&self.checked_input(id, TileFile::Atlas, TileFlags::ATLAS)?)
    }

    pub fn get_navtile(&self, id: TileId) -> Result<NavTile> {
        NavTile::deserialize(&self.checked_input(id, TileFile::NavTile, TileFlags::NAVTILE)?)
    }

    /// A mesh is fully covered when its coverage bitmap has every pixel.
    pub fn fully_covered(&self, id: TileId) -> Result<bool> {
        Ok(self.get_coverage(id)?.is_full())
    }

    pub fn get_metatile(&self, block: TileId) -> Result<MetaTile> {
        MetaTile::deserialize(&self.driver.input(Key::Tile(block, TileFile::Meta))?)
    }

    pub fn get_metanode(&self, id: TileId) -> Result<MetaNode> {
        if let Some(node) = self.nodes.get(&id) {
            return Ok(node.clone());
        }
        let block = self.get_metatile(id.meta_id(self.meta_order))?;
        block
            .get(id)?
            .cloned()
            .ok_or_else(|| Error::no_such_file(format!("metanode {}", id)))
    }

    fn stored_metanode(&self, id: TileId) -> Option<MetaNode> {
        let data = self
            .driver
            .input_maybe(Key::Tile(id.meta_id(self.meta_order), TileFile::Meta))
            .ok()??;
        MetaTile::deserialize(&data).ok()?.get(id).ok()?.cloned()
    }

    /// Store one tile's payloads, update the index, and note the metanode
    /// fields. When no NodeInfo is supplied it is derived from the
    /// reference frame; a supplied one is trusted.
    pub fn set_tile(&mut self, id: TileId, tile: Tile, node_info: Option<NodeInfo>) -> Result<()> {
        self.ensure_writable()?;
        let info = match node_info {
            Some(info) => info,
            None => self.node_info(id)?,
        };
        if !info.is_valid() {
            return Err(Error::inconsistent(format!(
                "tile {} lies outside the valid bounds of its subtree",
                id
            )));
        }
        if tile.atlas.is_none() && !tile.alien {
            return Err(Error::inconsistent(format!(
                "tile {} has a mesh but no atlas",
                id
            )));
        }

        let Tile {
            mesh,
            atlas,
            navtile,
            coverage,
            credits,
            alien,
        } = tile;
        let coverage =
            coverage.unwrap_or_else(|| rasterize_coverage(&mesh, &info.extents()));

        let mut node = MetaNode {
            flags: MetaFlags::HAS_MESH,
            extents: mesh.extents(),
            texel_size: (info.extents().size().0 / coverage_size() as f64) as f32,
            display_size: 256,
            height_range: {
                let (lo, hi) = mesh.height_range();
                (lo as f32, hi as f32)
            },
            reference: 0,
            credits: SmallVec::from_iter(credits.iter().copied()),
        };

        let payload = MeshPayload { mesh, coverage };
        self.driver
            .output(Key::Tile(id, TileFile::Mesh), &payload.serialize()?)?;
        let mut flags = TileFlags::MESH;
        if let Some(atlas) = &atlas {
            self.driver
                .output(Key::Tile(id, TileFile::Atlas), &atlas.serialize())?;
            flags |= TileFlags::ATLAS;
            node.flags |= MetaFlags::HAS_ATLAS;
        }
        if let Some(navtile) = &navtile {
            self.driver
                .output(Key::Tile(id, TileFile::NavTile), &navtile.serialize())?;
            flags |= TileFlags::NAVTILE;
            node.flags |= MetaFlags::HAS_NAVTILE;
            node.height_range = navtile.range();
        }
        if alien {
            flags |= TileFlags::ALIEN;
        }
        self.index.set(id, self.index.get(id) | flags.bits());
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Attach a navtile to a tile that already has its mesh.
    pub fn set_navtile(&mut self, id: TileId, navtile: NavTile) -> Result<()> {
        self.ensure_writable()?;
        if self.index.get(id) & TileFlags::MESH.bits() == 0 {
            return Err(Error::inconsistent(format!(
                "navtile for {} requires a mesh",
                id
            )));
        }
        self.driver
            .output(Key::Tile(id, TileFile::NavTile), &navtile.serialize())?;
        self.index.set_mask(id, TileFlags::NAVTILE, true);
        let stored = self.stored_metanode(id);
        let node = self
            .nodes
            .entry(id)
            .or_insert_with(|| stored.unwrap_or_default());
        node.flags |= MetaFlags::HAS_NAVTILE;
        node.height_range = navtile.range();
        Ok(())
    }

    /// Bulk-insert whole tile sets; see the paste module for semantics.
    pub fn paste(&mut self, sources: &[&TileSet], lod_range: Option<LodRange>) -> Result<()> {
        crate::paste::paste(self, sources, lod_range)
    }

    // Rebuild every metatile touched by the index, bottom-up, so parent
    // nodes aggregate their children's height ranges and texel sizes.
    fn flush_metatiles(&mut self) -> Result<usize> {
        let range = self.index.marked_lod_range();
        let max = match range.max() {
            Some(max) => max,
            None => return Ok(0),
        };
        let mut written = 0usize;
        let mut child_nodes: FxHashMap<TileId, MetaNode> = FxHashMap::default();
        for lod in (0..=max).rev() {
            let mut marked = Vec::new();
            self.index.traverse(lod, |id, value| {
                if TileFlags::is_marked(value) {
                    marked.push(id);
                }
            });
            if marked.is_empty() {
                child_nodes.clear();
                continue;
            }

            let mut blocks: FxHashMap<TileId, MetaTile> = FxHashMap::default();
            let mut computed: FxHashMap<TileId, MetaNode> = FxHashMap::default();
            for id in marked {
                let block_id = id.meta_id(self.meta_order);
                if !blocks.contains_key(&block_id) {
                    let base = match self
                        .driver
                        .input_maybe(Key::Tile(block_id, TileFile::Meta))?
                    {
                        Some(data) => MetaTile::deserialize(&data)?,
                        None => MetaTile::new(block_id, self.meta_order),
                    };
                    blocks.insert(block_id, base);
                }
                let block = blocks.get_mut(&block_id).expect("block just inserted");

                let mut node = match self.nodes.get(&id) {
                    Some(node) => node.clone(),
                    None => block.get(id)?.cloned().unwrap_or_default(),
                };
                node.flags &= !MetaFlags::HAS_CHILDREN;
                for child_index in ChildIndex::all() {
                    let child = id.child(child_index);
                    if self.index.get(child) != 0 {
                        node.flags |= MetaFlags::child(child_index);
                    }
                    if let Some(child_node) = child_nodes.get(&child) {
                        node.merge_height_range(child_node.height_range);
                        node.texel_size = node.texel_size.max(child_node.texel_size / 2.);
                        for &credit in &child_node.credits {
                            if !node.credits.contains(&credit) {
                                node.credits.push(credit);
                            }
                        }
                    }
                }
                node.credits.sort_unstable();
                block.set(id, node.clone())?;
                computed.insert(id, node);
            }
            for (block_id, block) in blocks {
                if block.is_empty() {
                    continue;
                }
                self.driver
                    .output(Key::Tile(block_id, TileFile::Meta), &block.serialize())?;
                // The block origin advertises the metatile's presence.
                self.index.set_mask(block_id, TileFlags::META, true);
                written += 1;
            }
            child_nodes = computed;
        }
        Ok(written)
    }

    fn registry_json(&self) -> JsonValue {
        let mut obj = JsonValue::new_object();
        let mut credits = JsonValue::new_array();
        for &id in &self.config.credits {
            if let Some(credit) = self.registry.credit(id) {
                let mut entry = JsonValue::new_object();
                entry["id"] = credit.id.into();
                entry["notice"] = credit.notice.clone().into();
                credits.push(entry).ok();
            }
        }
        obj["credits"] = credits;
        let mut layers = JsonValue::new_array();
        for &id in &self.config.bound_layers {
            if let Some(layer) = self.registry.bound_layer(id) {
                let mut entry = JsonValue::new_object();
                entry["id"] = layer.id.into();
                entry["url"] = layer.url.clone().into();
                layers.push(entry).ok();
            }
        }
        obj["boundLayers"] = layers;
        obj
    }

    /// Materialise everything: metatiles, the serialized tile index, the
    /// config, and the registry excerpt, then flush the driver. Without a
    /// flush the set is unreadable.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.index.make_absolute();
        let metatiles = self.flush_metatiles()?;
        self.driver
            .output(Key::File(FileType::TileIndex), &self.index.serialize())?;
        self.config.lod_range = self.index.lod_range();
        let config_bytes = self.config.serialize();
        self.driver
            .output(Key::File(FileType::Config), &config_bytes)?;
        self.driver.output(
            Key::File(FileType::Registry),
            self.registry_json().pretty(2).as_bytes(),
        )?;
        self.driver.flush()?;
        // Everything pending now lives in the stored metatiles.
        self.nodes.clear();
        info!(
            "tileset flush {}: lods {}, {} metatiles",
            self.config.id,
            self.config.lod_range,
            metatiles
        );
        Ok(())
    }

    pub fn last_modified(&self) -> Result<std::time::SystemTime> {
        self.driver.last_modified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::quad_submesh;
    use anyhow::Result;
    use driver::{Mode, TilarDriver, TilarDriverOptions};
    use std::path::Path;

    pub(crate) fn open_driver(root: &Path, mode: Mode) -> Result<Box<dyn Driver>> {
        Ok(Box::new(TilarDriver::open(
            root,
            mode,
            TilarDriverOptions::default(),
        )?))
    }

    pub(crate) fn test_tile() -> Tile {
        let mut atlas = Atlas::new();
        atlas.append(vec![0xAB; 16]);
        Tile::textured(Mesh::single(quad_submesh()), atlas)
    }

    fn new_set(root: &Path, id: &str) -> Result<TileSet> {
        let registry = Registry::with_default_frames();
        let driver = open_driver(root, Mode::Create)?;
        Ok(TileSet::create(
            driver,
            TileSetConfig::new(id, "square"),
            &registry,
        )?)
    }

    #[test]
    fn test_empty_set_lifecycle() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("empty");
        let mut ts = new_set(&root, "empty")?;
        assert!(ts.empty());
        assert!(ts.lod_range().is_empty());
        ts.flush()?;
        drop(ts);

        let registry = Registry::with_default_frames();
        let ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(ts.empty());
        assert!(ts.lod_range().is_empty());
        Ok(())
    }

    #[test]
    fn test_set_flush_reopen_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("hills");
        let id = TileId::new(3, 2, 1);
        let mut ts = new_set(&root, "hills")?;
        ts.set_tile(id, test_tile(), None)?;
        assert!(ts.exists(id));
        ts.flush()?;
        drop(ts);

        let registry = Registry::with_default_frames();
        let ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(!ts.empty());
        assert_eq!(ts.lod_range(), LodRange::of(3, 3));
        let mesh = ts.get_mesh(id)?;
        assert_eq!(mesh.submeshes.len(), 1);
        assert_eq!(mesh.submeshes[0].vertices.len(), 4);
        assert_eq!(mesh.submeshes[0].faces.len(), 2);
        let atlas = ts.get_atlas(id)?;
        assert_eq!(atlas.len(), 1);
        assert_eq!(atlas.image(0)?, &[0xAB; 16][..]);
        // The quad spans its whole tile, so the rasterised coverage is
        // complete.
        assert!(ts.fully_covered(id)?);
        let node = ts.get_metanode(id)?;
        assert!(node.has_mesh());
        assert_eq!(node.height_range, (10., 14.));
        // Unknown tiles stay unknown.
        assert!(!ts.exists(TileId::new(3, 1, 2)));
        assert!(ts.get_mesh(TileId::new(3, 1, 2)).is_err());
        Ok(())
    }

    #[test]
    fn test_metanode_aggregation_up_the_pyramid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("pyramid");
        let mut ts = new_set(&root, "pyramid")?;
        ts.set_tile(TileId::new(2, 0, 0), test_tile(), None)?;
        let mut tall = test_tile();
        for vertex in &mut tall.mesh.submeshes[0].vertices {
            vertex.z += 100.;
        }
        ts.set_tile(TileId::new(2, 1, 1), tall, None)?;
        ts.flush()?;

        // The lod-1 ancestor aggregates both children.
        let parent = ts.get_metanode(TileId::new(1, 0, 0))?;
        assert!(parent.has_children());
        assert!(!parent.has_mesh());
        assert_eq!(parent.height_range, (10., 114.));
        // And the root sees the same range one level further up.
        let root_node = ts.get_metanode(TileId::new(0, 0, 0))?;
        assert_eq!(root_node.height_range, (10., 114.));
        Ok(())
    }

    #[test]
    fn test_navtile_requires_mesh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("nav");
        let mut ts = new_set(&root, "nav")?;
        assert!(matches!(
            ts.set_navtile(TileId::new(2, 0, 0), NavTile::flat(5.)),
            Err(Error::InconsistentInput(_))
        ));
        ts.set_tile(TileId::new(2, 0, 0), test_tile(), None)?;
        ts.set_navtile(TileId::new(2, 0, 0), NavTile::flat(5.))?;
        ts.flush()?;
        assert_eq!(ts.get_navtile(TileId::new(2, 0, 0))?.range(), (5., 5.));
        let node = ts.get_metanode(TileId::new(2, 0, 0))?;
        assert!(node.flags.contains(MetaFlags::HAS_NAVTILE));
        assert_eq!(node.height_range, (5., 5.));
        Ok(())
    }

    #[test]
    fn test_mesh_without_atlas_rejected_unless_alien() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("alien");
        let mut ts = new_set(&root, "alien")?;
        let mut bare = test_tile();
        bare.atlas = None;
        assert!(matches!(
            ts.set_tile(TileId::new(1, 0, 0), bare.clone(), None),
            Err(Error::InconsistentInput(_))
        ));
        bare.alien = true;
        ts.set_tile(TileId::new(1, 0, 0), bare, None)?;
        assert_eq!(
            ts.index.get(TileId::new(1, 0, 0)) & TileFlags::ALIEN.bits(),
            TileFlags::ALIEN.bits()
        );
        Ok(())
    }

    #[test]
    fn test_read_only_set_rejects_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("sealed");
        let mut ts = new_set(&root, "sealed")?;
        ts.set_tile(TileId::new(1, 0, 0), test_tile(), None)?;
        ts.flush()?;
        drop(ts);

        let registry = Registry::with_default_frames();
        let mut ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(matches!(
            ts.set_tile(TileId::new(1, 1, 1), test_tile(), None),
            Err(Error::ReadOnly(_))
        ));
        assert!(matches!(ts.flush(), Err(Error::ReadOnly(_))));
        Ok(())
    }

    #[test]
    fn test_invalid_node_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = Registry::with_default_frames();
        let root = dir.path().join("half");
        let driver = open_driver(&root, Mode::Create)?;
        let mut ts = TileSet::create(
            driver,
            TileSetConfig::new("half", "square-half"),
            &registry,
        )?;
        // The right half of the frame is outside the valid bounds.
        assert!(matches!(
            ts.set_tile(TileId::new(1, 1, 0), test_tile(), None),
            Err(Error::InconsistentInput(_))
        ));
        ts.set_tile(TileId::new(1, 0, 0), test_tile(), None)?;
        Ok(())
    }

    #[test]
    fn test_reopen_read_write_repopulates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("grow");
        let mut ts = new_set(&root, "grow")?;
        ts.set_tile(TileId::new(2, 0, 0), test_tile(), None)?;
        ts.flush()?;
        drop(ts);

        let registry = Registry::with_default_frames();
        let mut ts = TileSet::open(open_driver(&root, Mode::ReadWrite)?, &registry)?;
        ts.set_tile(TileId::new(2, 3, 3), test_tile(), None)?;
        ts.flush()?;
        drop(ts);

        let ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(ts.exists(TileId::new(2, 0, 0)));
        assert!(ts.exists(TileId::new(2, 3, 3)));
        // The first tile's metadata survived the second flush.
        assert_eq!(ts.get_metanode(TileId::new(2, 0, 0))?.height_range, (10., 14.));
        Ok(())
    }
}
