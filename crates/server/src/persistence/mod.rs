//! Plot persistence.
//!
//! The service talks to storage only through `PlotStorage`. Backends hold
//! sparse data: default plots are never written and never returned.

pub mod memory;
pub mod record;
pub mod region;

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use plotgrid_engine::plot::PlotId;
use plotgrid_engine::world::PlotMap;

use crate::config::{StorageConfig, StorageKind};

pub use memory::MemoryStorage;
pub use region::RegionFileStorage;

/// Plots of every world, keyed by world name.
pub type PlotSnapshot = HashMap<String, PlotMap>;

/// Removed plot ids per world.
pub type DeletedPlots = HashMap<String, HashSet<PlotId>>;

/// Storage backend contract.
///
/// Calls never overlap: the save pipeline holds a lock around every call.
pub trait PlotStorage: Send {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    /// Read every stored plot.
    fn load(&mut self) -> Result<PlotSnapshot>;

    /// Replace everything stored with `worlds`.
    fn save(&mut self, worlds: &PlotSnapshot) -> Result<()>;

    fn supports_incremental_save(&self) -> bool {
        false
    }

    /// Upsert `dirty` and remove `deleted`, leaving other plots alone.
    fn save_incremental(&mut self, dirty: &PlotSnapshot, deleted: &DeletedPlots) -> Result<()> {
        let _ = (dirty, deleted);
        anyhow::bail!("{} storage does not support incremental saves", self.name())
    }
}

/// Build the backend named in the config.
pub fn open_storage(config: &StorageConfig) -> Box<dyn PlotStorage> {
    match config.kind {
        StorageKind::Region => Box::new(RegionFileStorage::new(&config.dir)),
        StorageKind::Memory => Box::new(MemoryStorage::new()),
    }
}

/// Total number of plots across worlds.
pub fn plot_count(worlds: &PlotSnapshot) -> usize {
    worlds.values().map(|plots| plots.len()).sum()
}
