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

// The lod-ordered tile generation engine. Levels run top-down; within a
// level, generation fans out over a fixed-size worker pool in fixed-size
// chunks and the results are dispatched in collection order through a
// bounded queue to a single writer, so a deterministic generator with a
// fixed worker count produces byte-identical payloads run over run.
use crate::{
    navtile::{NavTile, NAVTILE_SIZE},
    set::TileSet,
    tile::Tile,
};
use crossbeam::channel;
use fxhash::FxHashMap;
use log::{debug, info};
use parking_lot::Mutex;
use rayon::prelude::*;
use refframe::NodeInfo;
use std::sync::Arc;
use tileindex::TileFlags;
use tiling::{ChildIndex, Error, Extents2, LodRange, Result, Runnable, TileId};

const WRITE_QUEUE_DEPTH: usize = 64;
const GENERATE_CHUNK: usize = 32;

/// Bounds on a traversal: which lods to store and, optionally, which part
/// of the root SRS to visit at all.
#[derive(Clone, Debug)]
pub struct Constraints {
    pub lod_range: LodRange,
    pub extents: Option<Extents2>,
}

impl Constraints {
    pub fn new(lod_range: LodRange) -> Self {
        Self {
            lod_range,
            extents: None,
        }
    }

    pub fn clipped_to(mut self, extents: Extents2) -> Self {
        self.extents = Some(extents);
        self
    }
}

/// What a generator can say about one tile.
pub enum TileResult {
    Data(Box<Tile>),
    /// Nothing here, but descendants may still carry data.
    NoDataYet,
    /// Nothing here or anywhere below; prunes the subtree.
    NoData,
}

/// User-supplied tile producer. Called exactly once per reachable tile;
/// the parent's tile (when the parent produced data) is visible to every
/// child invocation.
pub trait TileGenerator: Send + Sync {
    fn generate(&self, id: TileId, node: &NodeInfo, parent: Option<&Tile>) -> Result<TileResult>;
}

impl<F> TileGenerator for F
where
    F: Fn(TileId, &NodeInfo, Option<&Tile>) -> Result<TileResult> + Send + Sync,
{
    fn generate(&self, id: TileId, node: &NodeInfo, parent: Option<&Tile>) -> Result<TileResult> {
        self(id, node, parent)
    }
}

// Sparse per-tile height rasters accumulated during generation. One mutex
// guards the map; allocation happens inside the critical section, sample
// merging is cheap enough to stay there too.
struct HeightAccumulator {
    grids: Mutex<FxHashMap<TileId, Vec<f32>>>,
}

impl HeightAccumulator {
    fn new() -> Self {
        Self {
            grids: Mutex::new(FxHashMap::default()),
        }
    }

    // Minimum wins over anything already rasterised.
    fn note_navtile(&self, id: TileId, navtile: &NavTile) {
        let mut grids = self.grids.lock();
        let grid = grids
            .entry(id)
            .or_insert_with(|| vec![f32::INFINITY; NAVTILE_SIZE * NAVTILE_SIZE]);
        for (slot, &height) in grid.iter_mut().zip(navtile.heights()) {
            if height < *slot {
                *slot = height;
            }
        }
    }

    // Downsample every grid at `lod` by averaging 2x2 blocks and merge the
    // result into the parent tile's grid.
    fn resize(&self, lod: u8) {
        if lod == 0 {
            return;
        }
        let mut grids = self.grids.lock();
        let level_ids = grids
            .keys()
            .filter(|id| id.lod() == lod)
            .copied()
            .collect::<Vec<_>>();
        const HALF: usize = NAVTILE_SIZE / 2;
        for id in level_ids {
            let source = grids[&id].clone();
            let parent = id.parent().expect("lod > 0");
            let ox = (id.x() & 1) as usize * HALF;
            let oy = (id.y() & 1) as usize * HALF;
            let target = grids
                .entry(parent)
                .or_insert_with(|| vec![f32::INFINITY; NAVTILE_SIZE * NAVTILE_SIZE]);
            for py in 0..HALF {
                for px in 0..HALF {
                    let mut sum = 0f32;
                    let mut count = 0u32;
                    for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                        let sample = source[(py * 2 + dy) * NAVTILE_SIZE + px * 2 + dx];
                        if sample.is_finite() {
                            sum += sample;
                            count += 1;
                        }
                    }
                    if count > 0 {
                        let value = sum / count as f32;
                        let slot = &mut target[(oy + py) * NAVTILE_SIZE + ox + px];
                        if value < *slot {
                            *slot = value;
                        }
                    }
                }
            }
        }
    }

    fn sorted_ids(&self) -> Vec<TileId> {
        let grids = self.grids.lock();
        let mut ids = grids.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable_by_key(|id| (id.lod(), id.y(), id.x()));
        ids
    }

    fn grid(&self, id: TileId) -> Option<Vec<f32>> {
        self.grids.lock().get(&id).cloned()
    }

    fn deepest_lod(&self) -> Option<u8> {
        self.grids.lock().keys().map(|id| id.lod()).max()
    }
}

/// Drives a TileGenerator over the reference-frame pyramid and lands the
/// results in a tile set.
pub struct Encoder {
    constraints: Constraints,
    runnable: Runnable,
    workers: usize,
}

impl Encoder {
    pub fn new(constraints: Constraints) -> Self {
        Self {
            constraints,
            runnable: Runnable::new(),
            workers: 0,
        }
    }

    /// Pin the worker pool size; required for reproducible runs.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_runnable(mut self, runnable: Runnable) -> Self {
        self.runnable = runnable;
        self
    }

    pub fn run(&self, ts: &mut TileSet, generator: &dyn TileGenerator) -> Result<()> {
        let frame = ts
            .registry()
            .frame(&ts.config().reference_frame)?
            .clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::internal(format!("worker pool: {}", e)))?;
        let accumulator = HeightAccumulator::new();
        let max_lod = self.constraints.lod_range.max();

        let mut cancelled = false;
        let mut failure: Option<Error> = None;
        let mut generated = 0usize;

        if let Some(max_lod) = max_lod {
            let runnable = &self.runnable;
            let constraints = &self.constraints;
            let accumulator_ref = &accumulator;
            let ts_ref = &mut *ts;
            let scope_result = crossbeam::thread::scope(|scope| {
                let (tx, rx) =
                    channel::bounded::<(TileId, NodeInfo, Arc<Tile>)>(WRITE_QUEUE_DEPTH);
                let writer = scope.spawn(move |_| -> Result<usize> {
                    let mut written = 0usize;
                    for (id, info, tile) in rx.iter() {
                        ts_ref.set_tile(id, (*tile).clone(), Some(info))?;
                        if let Some(navtile) = &tile.navtile {
                            accumulator_ref.note_navtile(id, navtile);
                        }
                        written += 1;
                    }
                    Ok(written)
                });

                let mut frontier: Vec<(TileId, Option<Arc<Tile>>)> =
                    vec![(TileId::root(), None)];
                'levels: for lod in 0..=max_lod {
                    if frontier.is_empty() {
                        break;
                    }
                    let jobs = frontier
                        .drain(..)
                        .filter_map(|(id, parent)| {
                            let info = NodeInfo::for_tile(&frame, id).ok()?;
                            if !info.is_valid() {
                                return None;
                            }
                            if let Some(window) = &constraints.extents {
                                if !window.overlaps(&info.extents()) {
                                    return None;
                                }
                            }
                            Some((id, info, parent))
                        })
                        .collect::<Vec<_>>();
                    debug!("encoder lod {}: {} tiles", lod, jobs.len());

                    let mut next = Vec::new();
                    for chunk in jobs.chunks(GENERATE_CHUNK) {
                        if !runnable.is_live() {
                            cancelled = true;
                            break 'levels;
                        }
                        let results = pool.install(|| {
                            chunk
                                .par_iter()
                                .map(|(id, info, parent)| {
                                    if !runnable.is_live() {
                                        return Ok(TileResult::NoData);
                                    }
                                    generator.generate(*id, info, parent.as_deref())
                                })
                                .collect::<Vec<Result<TileResult>>>()
                        });
                        for ((id, info, _), result) in chunk.iter().zip(results) {
                            let result = match result {
                                Ok(result) => result,
                                Err(e) => {
                                    failure = Some(e);
                                    break 'levels;
                                }
                            };
                            match result {
                                TileResult::Data(tile) => {
                                    let tile: Arc<Tile> = Arc::from(tile);
                                    if lod < max_lod {
                                        for child_index in ChildIndex::all() {
                                            next.push((
                                                id.child(child_index),
                                                Some(tile.clone()),
                                            ));
                                        }
                                    }
                                    if constraints.lod_range.contains(lod) {
                                        generated += 1;
                                        if tx.send((*id, info.clone(), tile)).is_err() {
                                            // Writer bailed; its error is
                                            // picked up at join.
                                            break 'levels;
                                        }
                                    }
                                }
                                TileResult::NoDataYet => {
                                    if lod < max_lod {
                                        for child_index in ChildIndex::all() {
                                            next.push((id.child(child_index), None));
                                        }
                                    }
                                }
                                TileResult::NoData => {}
                            }
                        }
                    }
                    frontier = next;
                }
                drop(tx);
                writer.join().expect("encoder writer panicked")
            });
            match scope_result {
                Ok(Ok(written)) => {
                    debug!("encoder wrote {} of {} generated tiles", written, generated);
                }
                Ok(Err(e)) => failure = Some(failure.take().unwrap_or(e)),
                Err(_) => failure = Some(Error::internal("encoder worker panicked")),
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        // Single-threaded finish: synthesize the coarse navtile pyramid,
        // then flush. Runs for a cancelled traversal too, so whatever was
        // written is consistent on disk before the cancel surfaces.
        self.finish(ts, &accumulator)?;
        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn finish(&self, ts: &mut TileSet, accumulator: &HeightAccumulator) -> Result<()> {
        if let Some(deepest) = accumulator.deepest_lod() {
            for lod in (1..=deepest).rev() {
                accumulator.resize(lod);
            }
            let mut emitted = 0usize;
            for id in accumulator.sorted_ids() {
                if id.lod() >= deepest {
                    continue;
                }
                if !ts.exists(id)
                    || ts.tile_index().get(id) & TileFlags::NAVTILE.bits() != 0
                {
                    continue;
                }
                let grid = accumulator.grid(id).expect("listed grid");
                if !grid.iter().any(|h| h.is_finite()) {
                    continue;
                }
                ts.set_navtile(id, NavTile::from_heights(grid)?)?;
                emitted += 1;
            }
            if emitted > 0 {
                info!("encoder synthesized {} coarse navtiles", emitted);
            }
        }
        ts.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        atlas::Atlas,
        config::TileSetConfig,
        mesh::{Mesh, SubMesh},
        set::TileSet,
    };
    use driver::{Driver, Mode, TilarDriver, TilarDriverOptions};
    use nalgebra::{Point2, Point3};
    use refframe::Registry;
    use std::path::Path;

    fn open_driver(root: &Path, mode: Mode) -> anyhow::Result<Box<dyn Driver>> {
        Ok(Box::new(TilarDriver::open(
            root,
            mode,
            TilarDriverOptions::default(),
        )?))
    }

    fn new_set(root: &Path, id: &str) -> anyhow::Result<TileSet> {
        let registry = Registry::with_default_frames();
        Ok(TileSet::create(
            open_driver(root, Mode::Create)?,
            TileSetConfig::new(id, "square"),
            &registry,
        )?)
    }

    // A quad spanning the node's whole extents at height 10 * lod, with a
    // flat navtile on the deepest level only.
    fn pyramid_tile(node: &NodeInfo, deepest: u8) -> Tile {
        let e = node.extents();
        let h = node.tile().lod() as f64 * 10.;
        let submesh = SubMesh {
            vertices: vec![
                Point3::new(e.min().x, e.min().y, h),
                Point3::new(e.max().x, e.min().y, h),
                Point3::new(e.max().x, e.max().y, h),
                Point3::new(e.min().x, e.max().y, h),
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
        };
        let mut atlas = Atlas::new();
        atlas.append(vec![node.tile().lod(); 4]);
        let mut tile = Tile::textured(Mesh::single(submesh), atlas);
        if node.tile().lod() == deepest {
            tile.navtile = Some(NavTile::flat(h as f32));
        }
        tile
    }

    #[test]
    fn test_generates_full_pyramid_with_navtile_synthesis() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("full");
        let mut ts = new_set(&root, "full")?;
        let generator = |id: TileId, node: &NodeInfo, parent: Option<&Tile>| {
            if id.lod() > 0 && parent.is_none() {
                return Err(Error::internal("parent result not visible to child"));
            }
            Ok(TileResult::Data(Box::new(pyramid_tile(node, 2))))
        };
        Encoder::new(Constraints::new(LodRange::of(0, 2)))
            .with_workers(2)
            .run(&mut ts, &generator)?;

        for lod in 0..=2u8 {
            let mut count = 0;
            ts.tile_index().traverse(lod, |_, value| {
                if TileFlags::is_material(value) {
                    count += 1;
                }
            });
            assert_eq!(count, 1usize << (2 * lod));
        }
        // The deepest level carried its own navtiles; the coarse levels
        // got theirs synthesized from the accumulator.
        assert_eq!(ts.get_navtile(TileId::new(2, 1, 1))?.range(), (20., 20.));
        assert_eq!(ts.get_navtile(TileId::new(1, 0, 0))?.range(), (20., 20.));
        assert_eq!(ts.get_navtile(TileId::new(0, 0, 0))?.range(), (20., 20.));
        Ok(())
    }

    #[test]
    fn test_no_data_at_root_yields_empty_set() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("void");
        let mut ts = new_set(&root, "void")?;
        let generator =
            |_: TileId, _: &NodeInfo, _: Option<&Tile>| Ok(TileResult::NoData);
        Encoder::new(Constraints::new(LodRange::of(0, 3)))
            .with_workers(2)
            .run(&mut ts, &generator)?;
        assert!(ts.empty());
        drop(ts);

        // The flush went through: the set reopens and is empty.
        let registry = Registry::with_default_frames();
        let ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(ts.empty());
        Ok(())
    }

    #[test]
    fn test_no_data_yet_descends_and_no_data_prunes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("sparse");
        let mut ts = new_set(&root, "sparse")?;
        let generator = |id: TileId, node: &NodeInfo, parent: Option<&Tile>| {
            Ok(match id.lod() {
                0 => TileResult::NoDataYet,
                1 => {
                    // Below a NoDataYet parent there is no parent tile.
                    if parent.is_some() {
                        return Err(Error::internal("unexpected parent payload"));
                    }
                    if id == TileId::new(1, 0, 0) {
                        TileResult::Data(Box::new(pyramid_tile(node, 2)))
                    } else {
                        TileResult::NoData
                    }
                }
                _ => TileResult::Data(Box::new(pyramid_tile(node, 2))),
            })
        };
        Encoder::new(Constraints::new(LodRange::of(0, 2)))
            .with_workers(2)
            .run(&mut ts, &generator)?;

        assert!(!ts.exists(TileId::new(0, 0, 0)));
        assert!(ts.exists(TileId::new(1, 0, 0)));
        // Only the surviving subtree descended.
        let mut deep = Vec::new();
        ts.tile_index().traverse(2, |id, value| {
            if TileFlags::is_material(value) {
                deep.push(id);
            }
        });
        assert_eq!(
            deep,
            vec![
                TileId::new(2, 0, 0),
                TileId::new(2, 1, 0),
                TileId::new(2, 0, 1),
                TileId::new(2, 1, 1),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_deterministic_output_across_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let generator = |_: TileId, node: &NodeInfo, _: Option<&Tile>| {
            Ok(TileResult::Data(Box::new(pyramid_tile(node, 2))))
        };
        let mut outputs = Vec::new();
        for run in 0..2 {
            let root = dir.path().join(format!("run{}", run));
            let mut ts = new_set(&root, "runs")?;
            Encoder::new(Constraints::new(LodRange::of(0, 2)))
                .with_workers(3)
                .run(&mut ts, &generator)?;
            let mut payloads = ts.tile_index().serialize();
            for lod in 0..=2u8 {
                let mut ids = Vec::new();
                ts.tile_index().traverse(lod, |id, _| ids.push(id));
                for id in ids {
                    if ts.exists(id) {
                        payloads.extend(
                            ts.driver
                                .input(driver::Key::Tile(id, driver::TileFile::Mesh))?,
                        );
                    }
                }
            }
            outputs.push(payloads);
        }
        assert_eq!(outputs[0], outputs[1]);
        Ok(())
    }

    #[test]
    fn test_cancellation_flushes_and_surfaces() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("cut");
        let mut ts = new_set(&root, "cut")?;
        let runnable = Runnable::new();
        let trip = runnable.clone();
        let generator = move |id: TileId, node: &NodeInfo, _: Option<&Tile>| {
            if id.lod() == 1 {
                trip.cancel();
            }
            Ok(TileResult::Data(Box::new(pyramid_tile(node, 4))))
        };
        let outcome = Encoder::new(Constraints::new(LodRange::of(0, 4)))
            .with_workers(2)
            .with_runnable(runnable)
            .run(&mut ts, &generator);
        assert!(matches!(outcome, Err(Error::Cancelled)));
        drop(ts);

        // What landed before the cancel is consistent on disk.
        let registry = Registry::with_default_frames();
        let ts = TileSet::open(open_driver(&root, Mode::ReadOnly)?, &registry)?;
        assert!(ts.exists(TileId::new(0, 0, 0)));
        Ok(())
    }
}
