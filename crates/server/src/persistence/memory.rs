//! Volatile storage. Clones share the same contents, which lets tests keep a
//! handle while the service owns the boxed backend.

use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use super::{DeletedPlots, PlotSnapshot, PlotStorage};

#[derive(Default)]
struct Shared {
    worlds: Mutex<PlotSnapshot>,
    full_saves: AtomicUsize,
    incremental_saves: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    incremental: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same contents, but advertising incremental saves.
    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    /// Start with `worlds` already stored.
    pub fn with_contents(worlds: PlotSnapshot) -> Self {
        let storage = Self::new();
        *storage.shared.worlds.lock().expect("memory storage poisoned") = worlds;
        storage
    }

    pub fn contents(&self) -> PlotSnapshot {
        self.shared.worlds.lock().expect("memory storage poisoned").clone()
    }

    pub fn full_saves(&self) -> usize {
        self.shared.full_saves.load(Relaxed)
    }

    pub fn incremental_saves(&self) -> usize {
        self.shared.incremental_saves.load(Relaxed)
    }
}

impl PlotStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&mut self) -> Result<PlotSnapshot> {
        Ok(self.contents())
    }

    fn save(&mut self, worlds: &PlotSnapshot) -> Result<()> {
        let mut stored = self.shared.worlds.lock().expect("memory storage poisoned");
        *stored = worlds
            .iter()
            .map(|(name, plots)| {
                let plots = plots
                    .iter()
                    .filter(|(_, plot)| !plot.is_default())
                    .map(|(id, plot)| (*id, Arc::clone(plot)))
                    .collect();
                (name.clone(), plots)
            })
            .collect();
        self.shared.full_saves.fetch_add(1, Relaxed);
        Ok(())
    }

    fn supports_incremental_save(&self) -> bool {
        self.incremental
    }

    fn save_incremental(&mut self, dirty: &PlotSnapshot, deleted: &DeletedPlots) -> Result<()> {
        if !self.incremental {
            anyhow::bail!("memory storage was created without incremental saves");
        }
        let mut stored = self.shared.worlds.lock().expect("memory storage poisoned");
        for (name, ids) in deleted {
            if let Some(plots) = stored.get_mut(name) {
                for id in ids {
                    plots.remove(id);
                }
            }
        }
        for (name, plots) in dirty {
            let target = stored.entry(name.clone()).or_default();
            for (id, plot) in plots {
                if plot.is_default() {
                    target.remove(id);
                } else {
                    target.insert(*id, Arc::clone(plot));
                }
            }
        }
        stored.retain(|_, plots| !plots.is_empty());
        self.shared.incremental_saves.fetch_add(1, Relaxed);
        Ok(())
    }
}
