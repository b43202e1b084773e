//! Sharded JSON storage: `<dir>/<world>/r.<rx>.<rz>.json`.
//!
//! Each region file holds up to 32x32 plots, the same sharding the Anvil
//! format uses for chunks. An incremental save rewrites only the regions that
//! contain a changed plot. Files are replaced atomically (write to `.tmp`,
//! then rename) so a crash mid-save never leaves a half-written region.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use plotgrid_engine::plot::{Plot, PlotId};
use plotgrid_engine::world::PlotMap;

use super::record::PlotRecord;
use super::{DeletedPlots, PlotSnapshot, PlotStorage};

/// Plots per region side.
pub const REGION_SPAN: i32 = 32;

/// Written into every region file.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Default)]
struct RegionFile {
    version: u32,
    /// Keyed by `"x;z"`.
    plots: BTreeMap<String, PlotRecord>,
}

/// Region coordinate of a plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn of(id: PlotId) -> Self {
        Self {
            x: id.x.div_euclid(REGION_SPAN),
            z: id.z.div_euclid(REGION_SPAN),
        }
    }

    fn file_name(&self) -> String {
        format!("r.{}.{}.json", self.x, self.z)
    }

    /// Inverse of `file_name`.
    fn parse_file_name(name: &str) -> Option<Self> {
        let inner = name.strip_prefix("r.")?.strip_suffix(".json")?;
        let (x, z) = inner.split_once('.')?;
        Some(Self {
            x: x.parse().ok()?,
            z: z.parse().ok()?,
        })
    }
}

pub struct RegionFileStorage {
    dir: PathBuf,
    /// Set once a load has read the whole directory. Until then a full save
    /// cannot tell stale regions from ones it never saw, so it keeps them.
    prune_stale: bool,
}

impl RegionFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prune_stale: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn world_dir(&self, world: &str) -> PathBuf {
        self.dir.join(world)
    }

    fn region_path(&self, world: &str, region: RegionPos) -> PathBuf {
        self.world_dir(world).join(region.file_name())
    }

    /// World directories currently on disk.
    fn world_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut worlds = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("reading storage dir {}", self.dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => worlds.push((name, entry.path())),
                Err(name) => tracing::warn!("Skipping non UTF-8 world dir {:?}", name),
            }
        }
        Ok(worlds)
    }
}

/// Region files in one world directory, keyed by region position.
fn region_files(world_dir: &Path) -> Result<HashMap<RegionPos, PathBuf>> {
    let mut regions = HashMap::new();
    for entry in fs::read_dir(world_dir)
        .with_context(|| format!("reading world dir {}", world_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match RegionPos::parse_file_name(&name) {
            Some(pos) => {
                regions.insert(pos, entry.path());
            }
            None if name.ends_with(".tmp") || name.ends_with(".corrupt") => {}
            None => tracing::warn!("Skipping unexpected file in {}: {}", world_dir.display(), name),
        }
    }
    Ok(regions)
}

fn read_region(path: &Path) -> Result<RegionFile> {
    let text = fs::read_to_string(path).with_context(|| format!("reading region {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing region {}", path.display()))
}

fn write_region(path: &Path, region: &RegionFile) -> Result<()> {
    let text = serde_json::to_string_pretty(region)
        .with_context(|| format!("serializing region {}", path.display()))?;
    write_atomic(path, text.as_bytes()).with_context(|| format!("writing region {}", path.display()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

/// Decode one region, dropping entries with bad ids or no owner.
fn decode_region(path: &Path, region: RegionFile) -> Vec<Plot> {
    let origin = path.display().to_string();
    let expected = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(RegionPos::parse_file_name);
    let mut plots = Vec::with_capacity(region.plots.len());
    for (key, record) in region.plots {
        let Ok(id) = key.parse::<PlotId>() else {
            tracing::warn!("Skipping plot with bad id {:?} in {}", key, origin);
            continue;
        };
        if expected.is_some_and(|pos| pos != RegionPos::of(id)) {
            tracing::warn!("Plot {} stored in wrong region {}", id, origin);
        }
        if let Some(plot) = record.into_plot(id, &origin) {
            plots.push(plot);
        }
    }
    plots
}

/// Move an unreadable region aside so later saves don't overwrite it.
fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_owned();
    target.push(".corrupt");
    if let Err(e) = fs::rename(path, &target) {
        tracing::error!("Could not move aside {}: {}", path.display(), e);
    }
}

fn group_by_region(plots: &PlotMap) -> HashMap<RegionPos, RegionFile> {
    let mut regions: HashMap<RegionPos, RegionFile> = HashMap::new();
    for (id, plot) in plots {
        if plot.is_default() {
            continue;
        }
        regions
            .entry(RegionPos::of(*id))
            .or_insert_with(|| RegionFile {
                version: FORMAT_VERSION,
                plots: BTreeMap::new(),
            })
            .plots
            .insert(id.to_string(), PlotRecord::from_plot(plot));
    }
    regions
}

impl PlotStorage for RegionFileStorage {
    fn name(&self) -> &'static str {
        "region"
    }

    fn load(&mut self) -> Result<PlotSnapshot> {
        let start = Instant::now();
        self.prune_stale = false;
        let mut files = Vec::new();
        for (world, world_dir) in self.world_dirs()? {
            for path in region_files(&world_dir)?.into_values() {
                files.push((world.clone(), path));
            }
        }

        let decoded: Vec<(String, Vec<Plot>)> = files
            .into_par_iter()
            .filter_map(|(world, path)| match read_region(&path) {
                Ok(region) => Some((world, decode_region(&path, region))),
                Err(e) => {
                    tracing::error!("Unreadable region, moving it aside: {:#}", e);
                    quarantine(&path);
                    None
                }
            })
            .collect();

        let region_count = decoded.len();
        let mut worlds = PlotSnapshot::new();
        for (world, plots) in decoded {
            let map = worlds.entry(world).or_default();
            for plot in plots {
                map.insert(plot.id(), Arc::new(plot));
            }
        }

        tracing::info!(
            "Plots loaded: {} plots from {} region files ({:.2?})",
            super::plot_count(&worlds),
            region_count,
            start.elapsed()
        );
        self.prune_stale = true;
        Ok(worlds)
    }

    fn save(&mut self, worlds: &PlotSnapshot) -> Result<()> {
        let start = Instant::now();
        let mut writes: Vec<(PathBuf, RegionFile)> = Vec::new();
        let mut keep: HashSet<PathBuf> = HashSet::new();
        for (world, plots) in worlds {
            for (pos, region) in group_by_region(plots) {
                let path = self.region_path(world, pos);
                keep.insert(path.clone());
                writes.push((path, region));
            }
        }

        writes
            .par_iter()
            .map(|(path, region)| write_region(path, region))
            .collect::<Result<Vec<()>>>()?;

        // Full overwrite: anything not written this round is stale, but only
        // if the directory was read in full first.
        let mut removed = 0usize;
        if self.prune_stale {
            for (_, world_dir) in self.world_dirs()? {
                for path in region_files(&world_dir)?.into_values() {
                    if !keep.contains(&path) {
                        remove_if_exists(&path)?;
                        removed += 1;
                    }
                }
            }
        } else {
            tracing::warn!(
                "Keeping existing region files in {}: they were not loaded",
                self.dir.display()
            );
        }

        tracing::info!(
            "Plots saved: {} plots in {} region files, {} stale removed ({:.2?})",
            super::plot_count(worlds),
            writes.len(),
            removed,
            start.elapsed()
        );
        Ok(())
    }

    fn supports_incremental_save(&self) -> bool {
        true
    }

    fn save_incremental(&mut self, dirty: &PlotSnapshot, deleted: &DeletedPlots) -> Result<()> {
        let start = Instant::now();

        // Touched regions and what changes in each.
        let mut touched: BTreeMap<(String, RegionPos), (Vec<&Arc<Plot>>, Vec<PlotId>)> = BTreeMap::new();
        for (world, plots) in dirty {
            for (id, plot) in plots {
                touched
                    .entry((world.clone(), RegionPos::of(*id)))
                    .or_default()
                    .0
                    .push(plot);
            }
        }
        for (world, ids) in deleted {
            for id in ids {
                touched
                    .entry((world.clone(), RegionPos::of(*id)))
                    .or_default()
                    .1
                    .push(*id);
            }
        }

        for ((world, pos), (upserts, removals)) in &touched {
            let path = self.region_path(world, *pos);
            let mut region = if path.exists() {
                read_region(&path)?
            } else {
                RegionFile::default()
            };
            region.version = FORMAT_VERSION;
            for id in removals {
                region.plots.remove(&id.to_string());
            }
            for plot in upserts {
                let key = plot.id().to_string();
                if plot.is_default() {
                    region.plots.remove(&key);
                } else {
                    region.plots.insert(key, PlotRecord::from_plot(plot));
                }
            }
            if region.plots.is_empty() {
                remove_if_exists(&path)?;
            } else {
                write_region(&path, &region)?;
            }
        }

        tracing::info!(
            "Plots saved incrementally: {} changed, {} deleted, {} regions touched ({:.2?})",
            super::plot_count(dirty),
            deleted.values().map(HashSet::len).sum::<usize>(),
            touched.len(),
            start.elapsed()
        );
        Ok(())
    }
}
