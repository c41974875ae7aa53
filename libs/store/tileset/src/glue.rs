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
    set::TileSet,
    tile::Tile,
};
use driver::{Driver, Key, Mode, TilarDriver, TilarDriverOptions, TileFile};
use log::{info, warn};
use refframe::Registry;
use smallvec::SmallVec;
use std::{fs, path::Path, path::PathBuf};
use tileindex::{TileFlags, TileIndex};
use tiling::{Error, Result, Runnable, TileId};

/// Compose N overlapping tile sets, given in ascending priority, into a
/// fresh tile set at dst_root. On every contested tile the higher-priority
/// surface wins; lower-priority submeshes leak through only where the
/// winner's coverage has holes. All metadata is regenerated from scratch,
/// and the destination only becomes visible (by rename) once the whole
/// glue succeeded.
pub fn create_glue(
    dst_root: &Path,
    id: &str,
    sources: &[&TileSet],
    registry: &Registry,
    texture_quality: u8,
    runnable: &Runnable,
) -> Result<TileSet> {
    if sources.is_empty() {
        return Err(Error::inconsistent("glue needs at least one source"));
    }
    let frame = &sources[0].config.reference_frame;
    for src in sources {
        if &src.config.reference_frame != frame {
            return Err(Error::inconsistent(format!(
                "glue sources span reference frames {} and {}",
                frame, src.config.reference_frame
            )));
        }
    }
    if dst_root.exists() {
        return Err(Error::already_exists(dst_root.display().to_string()));
    }

    let staging = staging_path(dst_root)?;
    if staging.exists() {
        warn!("removing stale glue staging {:?}", staging);
        fs::remove_dir_all(&staging)?;
    }

    let built = build_into(&staging, id, sources, registry, texture_quality, runnable);
    match built {
        Ok(()) => {
            fs::rename(&staging, dst_root)?;
            info!("glue {} committed to {:?}", id, dst_root);
            TileSet::open(
                Box::new(TilarDriver::open(
                    dst_root,
                    Mode::ReadOnly,
                    TilarDriverOptions::default(),
                )?),
                registry,
            )
        }
        Err(e) => {
            // No partial progress may be observed.
            fs::remove_dir_all(&staging).ok();
            Err(e)
        }
    }
}

fn staging_path(dst_root: &Path) -> Result<PathBuf> {
    let name = dst_root
        .file_name()
        .ok_or_else(|| Error::inconsistent("glue destination has no name"))?
        .to_string_lossy();
    Ok(dst_root.with_file_name(format!("{}.staging", name)))
}

fn build_into(
    staging: &Path,
    id: &str,
    sources: &[&TileSet],
    registry: &Registry,
    texture_quality: u8,
    runnable: &Runnable,
) -> Result<()> {
    let driver: Box<dyn Driver> = Box::new(TilarDriver::open(
        staging,
        Mode::Create,
        TilarDriverOptions::default(),
    )?);
    let mut config = TileSetConfig::new(id, &sources[0].config.reference_frame);
    for src in sources {
        for &credit in &src.config.credits {
            if !config.credits.contains(&credit) {
                config.credits.push(credit);
            }
        }
        for &layer in &src.config.bound_layers {
            if !config.bound_layers.contains(&layer) {
                config.bound_layers.push(layer);
            }
        }
    }
    config.credits.sort_unstable();
    config.bound_layers.sort_unstable();
    let mut dst = TileSet::create(driver, config, registry)?;

    let union = sources
        .iter()
        .fold(TileIndex::new(), |acc, src| acc.unite(&src.index));
    let mut composed = 0usize;
    let mut copied = 0usize;
    for lod in union.lod_range().iter() {
        let mut tiles = Vec::new();
        union.traverse(lod, |tile_id, value| {
            if TileFlags::is_material(value) {
                tiles.push(tile_id);
            }
        });
        for tile_id in tiles {
            runnable.check()?;
            // Ranks are 1-based positions in the ascending-priority input.
            let contributions = sources
                .iter()
                .enumerate()
                .filter(|(_, src)| src.exists(tile_id))
                .map(|(slot, src)| (slot as u16 + 1, *src))
                .collect::<Vec<_>>();
            match contributions.as_slice() {
                [] => continue,
                [(rank, src)] => {
                    copy_tile(&mut dst, src, tile_id, *rank)?;
                    copied += 1;
                }
                _ => {
                    compose_tile(&mut dst, &contributions, tile_id)?;
                    composed += 1;
                }
            }
        }
    }
    info!(
        "glue {}: {} copied, {} composed (texture quality {} unused; textures pass through)",
        id, copied, composed, texture_quality
    );
    dst.flush()
}

// A tile only one source owns moves without re-encode, like paste.
fn copy_tile(dst: &mut TileSet, src: &TileSet, id: TileId, _rank: u16) -> Result<()> {
    let value = src.index.get(id);
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
    dst.index.set(
        id,
        value & (TileFlags::MATERIAL | TileFlags::ALIEN).bits(),
    );
    if let Ok(node) = src.get_metanode(id) {
        dst.nodes.insert(id, node);
    }
    Ok(())
}

// A contested tile: the dominant surface plus, through the holes of its
// coverage, whatever the next priorities still show. Submeshes stack in
// dominance order and the atlas is re-assembled to match.
fn compose_tile(dst: &mut TileSet, contributions: &[(u16, &TileSet)], id: TileId) -> Result<()> {
    let (top_rank, top) = *contributions.last().expect("at least two contributions");
    let top_payload = top.mesh_payload(id)?;
    let mut accumulated = top_payload.coverage.clone();
    let mut mesh = top_payload.mesh;
    let mut atlas = match top.index.get(id) & TileFlags::ATLAS.bits() {
        0 => Atlas::new(),
        _ => top.get_atlas(id)?,
    };
    let mut credits: SmallVec<[u16; 2]> = SmallVec::new();
    let mut navtile = None;
    for (_, src) in contributions.iter().rev() {
        if navtile.is_none() && src.index.get(id) & TileFlags::NAVTILE.bits() != 0 {
            navtile = Some(src.get_navtile(id)?);
        }
        if let Ok(node) = src.get_metanode(id) {
            for &credit in &node.credits {
                if !credits.contains(&credit) {
                    credits.push(credit);
                }
            }
        }
    }
    credits.sort_unstable();

    for (_, src) in contributions.iter().rev().skip(1) {
        let payload = src.mesh_payload(id)?;
        let leak = payload.coverage.intersect(&accumulated.inverted());
        if leak.is_empty() {
            continue;
        }
        mesh.submeshes.extend(payload.mesh.submeshes);
        if src.index.get(id) & TileFlags::ATLAS.bits() != 0 {
            for image in src.get_atlas(id)?.iter() {
                atlas.append(image.to_vec());
            }
        }
        accumulated = accumulated.unite(&payload.coverage);
    }

    let tile = Tile {
        mesh,
        atlas: Some(atlas),
        navtile,
        coverage: Some(accumulated),
        credits,
        alien: false,
    };
    dst.set_tile(id, tile, None)?;
    dst.index.set_mask(id, TileFlags::REFERENCE, true);
    if let Some(node) = dst.nodes.get_mut(&id) {
        node.reference = top_rank;
    }
    Ok(())
}
