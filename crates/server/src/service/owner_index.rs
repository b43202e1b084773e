//! Home plot per owner.
//!
//! Only the service thread writes the index, but `find_home` reads it from
//! any thread, so it lives in a `DashMap` rather than inside `PlotState`.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use uuid::Uuid;

use plotgrid_engine::plot::PlotId;
use plotgrid_engine::world::PlotWorld;

/// A plot addressed by world name and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlotLocation {
    pub world: String,
    pub id: PlotId,
}

impl PlotLocation {
    pub fn new(world: impl Into<String>, id: PlotId) -> Self {
        Self { world: world.into(), id }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OwnerIndex {
    homes: Arc<DashMap<Uuid, PlotLocation>>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn home(&self, owner: Uuid) -> Option<PlotLocation> {
        self.homes.get(&owner).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, owner: Uuid) -> bool {
        self.homes.contains_key(&owner)
    }

    pub fn len(&self) -> usize {
        self.homes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.homes.is_empty()
    }

    pub(crate) fn set(&self, owner: Uuid, location: PlotLocation) {
        self.homes.insert(owner, location);
    }

    /// Re-derive `owner`'s home from the plots. Keeps the first plot already
    /// flagged as home (world order, then id), otherwise promotes the first
    /// owned plot. Every other plot of the owner loses the home flag. Drops
    /// the entry when the owner has nothing left.
    ///
    /// Returns whether any plot was rewritten.
    pub(crate) fn recompute(&self, worlds: &mut IndexMap<String, PlotWorld>, owner: Uuid) -> bool {
        let mut owned: Vec<(usize, PlotId, bool)> = Vec::new();
        for (index, world) in worlds.values().enumerate() {
            let mut ids: Vec<(PlotId, bool)> =
                world.owned_by(owner).map(|p| (p.id(), p.is_home())).collect();
            ids.sort_unstable();
            owned.extend(ids.into_iter().map(|(id, home)| (index, id, home)));
        }

        let Some(&(world_index, home_id, _)) =
            owned.iter().find(|(_, _, home)| *home).or_else(|| owned.first())
        else {
            self.homes.remove(&owner);
            return false;
        };

        let mut changed = false;
        for (index, id, home) in owned {
            let wanted = index == world_index && id == home_id;
            if home != wanted {
                if let Some((_, world)) = worlds.get_index_mut(index) {
                    changed |= world.update_plot(id, |p| p.with_home(wanted));
                }
            }
        }
        if let Some((name, _)) = worlds.get_index(world_index) {
            self.set(owner, PlotLocation::new(name.clone(), home_id));
        }
        changed
    }

    /// Rebuild the whole index from the plots, as after a load.
    pub(crate) fn rebuild(&self, worlds: &mut IndexMap<String, PlotWorld>) -> bool {
        self.homes.clear();
        let owners: BTreeSet<Uuid> = worlds
            .values()
            .flat_map(|world| world.plots().filter_map(|(_, p)| p.owner()))
            .collect();
        let mut changed = false;
        for owner in owners {
            changed |= self.recompute(worlds, owner);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotgrid_engine::world::grid::GridConfig;

    fn worlds() -> IndexMap<String, PlotWorld> {
        ["a", "b"]
            .into_iter()
            .map(|name| (name.to_string(), PlotWorld::new(name, GridConfig::default())))
            .collect()
    }

    fn claim(worlds: &mut IndexMap<String, PlotWorld>, world: &str, id: PlotId, owner: Uuid, home: bool) {
        let w = worlds.get_mut(world).unwrap();
        w.claim_plot(id, owner, None);
        w.update_plot(id, |p| p.with_home(home));
    }

    #[test]
    fn test_promotes_smallest_id_in_first_world() {
        let mut ws = worlds();
        let owner = Uuid::new_v4();
        claim(&mut ws, "b", PlotId::new(-5, 0), owner, false);
        claim(&mut ws, "a", PlotId::new(3, 3), owner, false);
        claim(&mut ws, "a", PlotId::new(1, 9), owner, false);

        let index = OwnerIndex::new();
        assert!(index.recompute(&mut ws, owner));
        assert_eq!(index.home(owner), Some(PlotLocation::new("a", PlotId::new(1, 9))));
        assert!(ws["a"].plot(PlotId::new(1, 9)).unwrap().is_home());
    }

    #[test]
    fn test_keeps_existing_home_and_clears_extras() {
        let mut ws = worlds();
        let owner = Uuid::new_v4();
        claim(&mut ws, "a", PlotId::new(0, 0), owner, false);
        claim(&mut ws, "b", PlotId::new(4, 4), owner, true);
        claim(&mut ws, "b", PlotId::new(5, 5), owner, true);

        let index = OwnerIndex::new();
        assert!(index.recompute(&mut ws, owner));
        assert_eq!(index.home(owner), Some(PlotLocation::new("b", PlotId::new(4, 4))));
        assert!(!ws["b"].plot(PlotId::new(5, 5)).unwrap().is_home());
        assert!(!ws["a"].plot(PlotId::new(0, 0)).unwrap().is_home());
        assert!(!index.recompute(&mut ws, owner));
    }

    #[test]
    fn test_owner_without_plots_is_dropped() {
        let mut ws = worlds();
        let owner = Uuid::new_v4();
        let index = OwnerIndex::new();
        index.set(owner, PlotLocation::new("a", PlotId::new(0, 0)));
        assert!(!index.recompute(&mut ws, owner));
        assert!(index.home(owner).is_none());
    }

    #[test]
    fn test_rebuild_covers_every_owner() {
        let mut ws = worlds();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        claim(&mut ws, "a", PlotId::new(0, 0), x, false);
        claim(&mut ws, "b", PlotId::new(0, 0), y, true);
        let index = OwnerIndex::new();
        index.set(Uuid::new_v4(), PlotLocation::new("a", PlotId::new(7, 7)));

        index.rebuild(&mut ws);
        assert_eq!(index.len(), 2);
        assert_eq!(index.home(x), Some(PlotLocation::new("a", PlotId::new(0, 0))));
        assert_eq!(index.home(y), Some(PlotLocation::new("b", PlotId::new(0, 0))));
    }
}
