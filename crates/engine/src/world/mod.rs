pub mod grid;
pub mod merge;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::plot::{Plot, PlotId};
use grid::GridConfig;

/// Plot map snapshot. Values are shared, so taking one is a shallow copy.
pub type PlotMap = HashMap<PlotId, Arc<Plot>>;

/// Changes accumulated since the last checkpoint.
#[derive(Debug, Clone, Default)]
pub struct PlotChanges {
    /// Current values of plots written since the checkpoint.
    pub dirty: PlotMap,
    /// Plots removed since the checkpoint.
    pub deleted: HashSet<PlotId>,
}

impl PlotChanges {
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.deleted.is_empty()
    }
}

/// One plot world: a named grid holding a sparse map of non-default plots.
///
/// Tracks which plots were written or removed since the last save so storage
/// backends can persist only the difference. Not thread-safe on its own; the
/// server keeps every `PlotWorld` on a single owning thread.
#[derive(Debug, Clone)]
pub struct PlotWorld {
    name: String,
    grid: GridConfig,
    plots: PlotMap,
    /// Plots written since the last checkpoint.
    dirty: HashSet<PlotId>,
    /// Plots removed since the last checkpoint.
    deleted: HashSet<PlotId>,
}

impl PlotWorld {
    pub fn new(name: impl Into<String>, grid: GridConfig) -> Self {
        Self {
            name: name.into(),
            grid,
            plots: HashMap::new(),
            dirty: HashSet::new(),
            deleted: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> GridConfig {
        self.grid
    }

    pub fn plot(&self, id: PlotId) -> Option<&Arc<Plot>> {
        self.plots.get(&id)
    }

    /// Stored plot or the default plot for `id`.
    pub fn plot_or_default(&self, id: PlotId) -> Plot {
        self.plots
            .get(&id)
            .map(|plot| Plot::clone(plot))
            .unwrap_or_else(|| Plot::new(id))
    }

    pub fn plots(&self) -> impl Iterator<Item = (&PlotId, &Arc<Plot>)> {
        self.plots.iter()
    }

    pub fn plot_count(&self) -> usize {
        self.plots.len()
    }

    /// Store a plot and mark it dirty. Storing a default plot removes the
    /// entry instead, since defaults are never kept.
    pub fn put_plot(&mut self, plot: Plot) {
        let id = plot.id();
        if plot.is_default() {
            self.remove_plot(id);
            return;
        }
        self.plots.insert(id, Arc::new(plot));
        self.deleted.remove(&id);
        self.dirty.insert(id);
    }

    /// Remove a plot. Only records a deletion if something was stored.
    pub fn remove_plot(&mut self, id: PlotId) -> Option<Arc<Plot>> {
        let removed = self.plots.remove(&id)?;
        self.dirty.remove(&id);
        self.deleted.insert(id);
        Some(removed)
    }

    /// Apply `f` to the stored plot and write it back if anything changed.
    /// Returns false (and does nothing) when `id` is not stored or `f` was a
    /// no-op.
    pub fn update_plot(&mut self, id: PlotId, f: impl FnOnce(Plot) -> Plot) -> bool {
        let Some(current) = self.plots.get(&id) else {
            return false;
        };
        let updated = f(Plot::clone(current));
        if updated == **current {
            return false;
        }
        self.put_plot(updated);
        true
    }

    /// Insert plots coming from storage without marking them dirty. Unclaimed
    /// plots are skipped: without an owner a plot can only be the default.
    pub fn insert_loaded(&mut self, plots: impl IntoIterator<Item = Arc<Plot>>) {
        for plot in plots {
            if plot.is_claimed() {
                self.plots.insert(plot.id(), plot);
            }
        }
    }

    /// Give `id` to `owner`, starting from the default plot if nothing is
    /// stored. Returns the stored value.
    pub fn claim_plot(&mut self, id: PlotId, owner: Uuid, owner_name: Option<String>) -> Arc<Plot> {
        let claimed = self.plot_or_default(id).with_owner(Some(owner), owner_name);
        self.put_plot(claimed);
        self.plots
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::new(Plot::new(id)))
    }

    pub fn owned_by(&self, owner: Uuid) -> impl Iterator<Item = &Arc<Plot>> {
        self.plots.values().filter(move |plot| plot.is_owner(owner))
    }

    pub fn count_owned(&self, owner: Uuid) -> usize {
        self.owned_by(owner).count()
    }

    /// First unclaimed plot walking square rings outward from the origin.
    pub fn find_next_free_plot_id(&self) -> PlotId {
        let is_free = |id: &PlotId| self.plots.get(id).is_none_or(|plot| !plot.is_claimed());
        let mut radius = 0i32;
        loop {
            for x in -radius..=radius {
                for z in -radius..=radius {
                    if x.abs() != radius && z.abs() != radius {
                        continue;
                    }
                    let id = PlotId::new(x, z);
                    if is_free(&id) {
                        return id;
                    }
                }
            }
            radius += 1;
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty()
    }

    pub fn dirty_plots(&self) -> &HashSet<PlotId> {
        &self.dirty
    }

    pub fn deleted_plots(&self) -> &HashSet<PlotId> {
        &self.deleted
    }

    /// Drain the change sets, pairing each dirty id with its current value.
    /// After this returns, `has_changes()` is false.
    pub fn take_changes(&mut self) -> PlotChanges {
        let dirty = self
            .dirty
            .drain()
            .filter_map(|id| self.plots.get(&id).map(|plot| (id, Arc::clone(plot))))
            .collect();
        let deleted = std::mem::take(&mut self.deleted);
        PlotChanges { dirty, deleted }
    }

    pub fn clear_changes(&mut self) {
        self.dirty.clear();
        self.deleted.clear();
    }

    /// Shallow copy of every stored plot.
    pub fn snapshot(&self) -> PlotMap {
        self.plots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> PlotWorld {
        PlotWorld::new("plots", GridConfig::default())
    }

    #[test]
    fn test_put_marks_dirty_and_undeletes() {
        let mut w = world();
        let id = PlotId::new(1, 1);
        let owner = Uuid::new_v4();
        w.claim_plot(id, owner, None);
        assert!(w.dirty_plots().contains(&id));

        w.remove_plot(id);
        assert!(!w.dirty_plots().contains(&id));
        assert!(w.deleted_plots().contains(&id));

        w.claim_plot(id, owner, None);
        assert!(w.dirty_plots().contains(&id));
        assert!(!w.deleted_plots().contains(&id));
    }

    #[test]
    fn test_remove_missing_records_nothing() {
        let mut w = world();
        assert!(w.remove_plot(PlotId::new(0, 0)).is_none());
        assert!(!w.has_changes());
    }

    #[test]
    fn test_default_plot_is_not_stored() {
        let mut w = world();
        let id = PlotId::new(0, 0);
        w.claim_plot(id, Uuid::new_v4(), None);
        w.put_plot(Plot::new(id));
        assert!(w.plot(id).is_none());
        assert!(w.deleted_plots().contains(&id));
    }

    #[test]
    fn test_update_noop_leaves_world_clean() {
        let mut w = world();
        let id = PlotId::new(0, 0);
        w.claim_plot(id, Uuid::new_v4(), None);
        w.clear_changes();
        assert!(!w.update_plot(id, |p| p.with_home(false)));
        assert!(!w.has_changes());
        assert!(w.update_plot(id, |p| p.with_home(true)));
        assert!(w.dirty_plots().contains(&id));
        assert!(!w.update_plot(PlotId::new(9, 9), |p| p.with_home(true)));
    }

    #[test]
    fn test_take_changes_drains() {
        let mut w = world();
        let a = PlotId::new(0, 0);
        let b = PlotId::new(0, 1);
        let owner = Uuid::new_v4();
        w.claim_plot(a, owner, None);
        w.claim_plot(b, owner, None);
        w.clear_changes();
        w.update_plot(a, |p| p.with_home(true));
        w.remove_plot(b);

        let changes = w.take_changes();
        assert_eq!(changes.dirty.len(), 1);
        assert!(changes.dirty[&a].is_home());
        assert_eq!(changes.deleted, HashSet::from([b]));
        assert!(!w.has_changes());
    }

    #[test]
    fn test_loaded_plots_are_clean() {
        let mut w = world();
        let plot = Plot::new(PlotId::new(3, 3)).with_owner(Some(Uuid::new_v4()), None);
        w.insert_loaded([Arc::new(plot), Arc::new(Plot::new(PlotId::new(4, 4)))]);
        assert_eq!(w.plot_count(), 1);
        assert!(!w.has_changes());
    }

    #[test]
    fn test_snapshot_is_isolated_from_updates() {
        let mut w = world();
        let id = PlotId::new(0, 0);
        w.claim_plot(id, Uuid::new_v4(), None);
        let before = w.snapshot();
        w.update_plot(id, |p| p.with_home(true));
        assert!(!before[&id].is_home());
        assert!(w.plot(id).is_some_and(|p| p.is_home()));
    }

    #[test]
    fn test_next_free_spirals_outward() {
        let mut w = world();
        let owner = Uuid::new_v4();
        assert_eq!(w.find_next_free_plot_id(), PlotId::new(0, 0));
        w.claim_plot(PlotId::new(0, 0), owner, None);
        let next = w.find_next_free_plot_id();
        assert_eq!(next, PlotId::new(-1, -1));

        for x in -1..=1 {
            for z in -1..=1 {
                w.claim_plot(PlotId::new(x, z), owner, None);
            }
        }
        let next = w.find_next_free_plot_id();
        assert_eq!(next.x.abs().max(next.z.abs()), 2);
        assert_eq!(w.count_owned(owner), 9);
    }
}
