//! Plot state owned by the service thread, and every operation on it.
//!
//! Nothing here is synchronised: the service hands `&mut PlotState` to one
//! task at a time. Tests drive it directly.

use std::sync::Arc;

use indexmap::IndexMap;
use uuid::Uuid;

use plotgrid_engine::plot::{MergeDirection, Plot, PlotBounds, PlotId};
use plotgrid_engine::world::PlotWorld;
use plotgrid_engine::world::grid::GridConfig;

use super::owner_index::{OwnerIndex, PlotLocation};
use super::results::{ClaimResult, MergeResult, OwnerActionResult, UnmergeResult};
use super::save::SaveJob;
use crate::persistence::{self, DeletedPlots, PlotSnapshot};

pub struct PlotState {
    worlds: IndexMap<String, PlotWorld>,
    /// Stored plots of worlds missing from the config. Carried through full
    /// saves untouched so dropping a world from the config loses nothing.
    detached: PlotSnapshot,
    homes: OwnerIndex,
    /// Set by every mutation, cleared when a save job is taken.
    dirty: bool,
}

impl PlotState {
    pub fn new(grids: IndexMap<String, GridConfig>, homes: OwnerIndex) -> Self {
        let worlds = grids
            .into_iter()
            .map(|(name, grid)| {
                let world = PlotWorld::new(name.clone(), grid);
                (name, world)
            })
            .collect();
        Self {
            worlds,
            detached: PlotSnapshot::new(),
            homes,
            dirty: false,
        }
    }

    /// Replace all plots with `stored`, repair merge links and rebuild the
    /// owner index. Returns the number of plots loaded into known worlds.
    pub fn load(&mut self, mut stored: PlotSnapshot) -> usize {
        let mut changed = false;
        let mut loaded = 0;
        for (name, world) in self.worlds.iter_mut() {
            *world = PlotWorld::new(name.clone(), world.grid());
            if let Some(plots) = stored.remove(name) {
                world.insert_loaded(plots.into_values());
                loaded += world.plot_count();
                changed |= world.normalize_merges();
            }
        }
        if !stored.is_empty() {
            tracing::warn!(
                "Keeping {} plots of unconfigured worlds: {:?}",
                persistence::plot_count(&stored),
                stored.keys().collect::<Vec<_>>()
            );
        }
        self.detached = stored;
        changed |= self.homes.rebuild(&mut self.worlds);
        if changed {
            tracing::info!("Repaired plot data after load");
        }
        self.dirty = changed;
        loaded
    }

    pub fn world(&self, name: &str) -> Option<&PlotWorld> {
        self.worlds.get(name)
    }

    pub fn worlds(&self) -> impl Iterator<Item = &PlotWorld> {
        self.worlds.values()
    }

    pub fn world_names(&self) -> Vec<String> {
        self.worlds.keys().cloned().collect()
    }

    pub fn homes(&self) -> &OwnerIndex {
        &self.homes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn plot(&self, world: &str, id: PlotId) -> Option<Arc<Plot>> {
        self.world(world)?.plot(id).cloned()
    }

    /// Plot covering block `(x, z)`, merged road included.
    pub fn plot_at(&self, world: &str, x: i32, z: i32) -> Option<PlotId> {
        self.world(world)?.plot_id_at(x, z)
    }

    pub fn merged_bounds(&self, world: &str, id: PlotId) -> Option<PlotBounds> {
        Some(self.world(world)?.merged_plot_bounds(id))
    }

    pub fn count_owned(&self, world: &str, owner: Uuid) -> usize {
        self.world(world).map_or(0, |w| w.count_owned(owner))
    }

    /// Every plot of `owner`, in world order then id order.
    pub fn owned_plots(&self, owner: Uuid) -> Vec<PlotLocation> {
        let mut out = Vec::new();
        for (name, world) in &self.worlds {
            let mut ids: Vec<PlotId> = world.owned_by(owner).map(|p| p.id()).collect();
            ids.sort_unstable();
            out.extend(ids.into_iter().map(|id| PlotLocation::new(name.clone(), id)));
        }
        out
    }

    /// Claimed plot that `requester` may act on.
    fn check_owned(
        &self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
    ) -> Result<Arc<Plot>, OwnerActionResult> {
        let plot = self
            .plot(world, id)
            .filter(|p| p.is_claimed())
            .ok_or(OwnerActionResult::Unclaimed)?;
        if !bypass_owner && !plot.is_owner(requester) {
            return Err(OwnerActionResult::NotOwner);
        }
        Ok(plot)
    }

    pub fn claim(
        &mut self,
        world: &str,
        id: PlotId,
        owner: Uuid,
        owner_name: Option<String>,
        max_plots: usize,
    ) -> ClaimResult {
        let Some(w) = self.worlds.get_mut(world) else {
            return ClaimResult::Failed;
        };
        if w.plot(id).is_some_and(|p| p.is_claimed()) {
            return ClaimResult::AlreadyClaimed;
        }
        if max_plots > 0 && w.count_owned(owner) >= max_plots {
            return ClaimResult::TooMany;
        }

        let plot = w.claim_plot(id, owner, owner_name);
        if plot.is_home() {
            self.homes.set(owner, PlotLocation::new(world, id));
        } else if !self.homes.contains(owner) {
            w.update_plot(id, |p| p.with_home(true));
            self.homes.set(owner, PlotLocation::new(world, id));
        }
        self.dirty = true;
        ClaimResult::Success
    }

    pub fn delete(&mut self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool) -> OwnerActionResult {
        let removed = match self.check_owned(world, id, requester, bypass_owner) {
            Ok(plot) => plot,
            Err(result) => return result,
        };
        let Some(w) = self.worlds.get_mut(world) else {
            return OwnerActionResult::Unclaimed;
        };
        w.clear_merged_connections(id);
        w.remove_plot(id);
        self.dirty = true;

        if let Some(owner) = removed.owner() {
            let was_home = removed.is_home()
                || self.homes.home(owner) == Some(PlotLocation::new(world, id));
            if was_home {
                self.homes.recompute(&mut self.worlds, owner);
            }
        }
        OwnerActionResult::Success
    }

    /// Hand the plot to `new_owner`. The same owner only updates the display
    /// name; anyone else gets a fresh plot with its merge links cut.
    pub fn set_owner(
        &mut self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        new_owner: Uuid,
        new_owner_name: Option<String>,
    ) -> OwnerActionResult {
        let plot = match self.check_owned(world, id, requester, bypass_owner) {
            Ok(plot) => plot,
            Err(result) => return result,
        };
        let Some(w) = self.worlds.get_mut(world) else {
            return OwnerActionResult::Unclaimed;
        };

        if plot.is_owner(new_owner) {
            if w.update_plot(id, |p| p.with_owner(Some(new_owner), new_owner_name)) {
                self.dirty = true;
            }
            return OwnerActionResult::Success;
        }

        w.clear_merged_connections(id);
        w.update_plot(id, |p| p.with_owner(Some(new_owner), new_owner_name));
        self.dirty = true;

        if let Some(old_owner) = plot.owner() {
            self.homes.recompute(&mut self.worlds, old_owner);
        }
        if !self.homes.contains(new_owner) {
            if let Some(w) = self.worlds.get_mut(world) {
                w.update_plot(id, |p| p.with_home(true));
            }
            self.homes.set(new_owner, PlotLocation::new(world, id));
        }
        OwnerActionResult::Success
    }

    /// Make `id` the owner's home. Requires ownership; there is no bypass.
    pub fn set_home(&mut self, owner: Uuid, world: &str, id: PlotId) -> OwnerActionResult {
        if let Err(result) = self.check_owned(world, id, owner, false) {
            return result;
        }
        let target = PlotLocation::new(world, id);
        let mut changed = false;

        if let Some(old) = self.homes.home(owner).filter(|old| *old != target) {
            if let Some(w) = self.worlds.get_mut(&old.world) {
                let still_home = w.plot(old.id).is_some_and(|p| p.is_owner(owner) && p.is_home());
                if still_home {
                    changed |= w.update_plot(old.id, |p| p.with_home(false));
                }
            }
        }
        if let Some(w) = self.worlds.get_mut(world) {
            changed |= w.update_plot(id, |p| p.with_home(true));
        }
        self.homes.set(owner, target);
        if changed {
            self.dirty = true;
        }
        OwnerActionResult::Success
    }

    pub fn merge(
        &mut self,
        world: &str,
        id: PlotId,
        direction: MergeDirection,
        requester: Uuid,
        bypass_owner: bool,
    ) -> MergeResult {
        if !self.worlds.contains_key(world) {
            return MergeResult::Failed;
        }
        let plot = match self.check_owned(world, id, requester, bypass_owner) {
            Ok(plot) => plot,
            Err(OwnerActionResult::NotOwner) => return MergeResult::NotOwner,
            Err(_) => return MergeResult::Unclaimed,
        };
        let Some(w) = self.worlds.get_mut(world) else {
            return MergeResult::Failed;
        };

        let Some(target) = w.plot(id.adjacent(direction)).filter(|p| p.is_claimed()) else {
            return MergeResult::TargetUnclaimed;
        };
        if target.owner() != plot.owner() {
            return MergeResult::NotSameOwner;
        }
        if w.is_merged(id, direction) {
            return MergeResult::AlreadyMerged;
        }
        if !w.set_merged(id, direction, true) {
            return MergeResult::Failed;
        }
        self.dirty = true;

        if let Some(source) = self.plot(world, id) {
            self.sync_plot_settings(world, id, &source);
        }
        MergeResult::Success
    }

    pub fn unmerge(
        &mut self,
        world: &str,
        id: PlotId,
        direction: MergeDirection,
        requester: Uuid,
        bypass_owner: bool,
    ) -> UnmergeResult {
        let Some(w) = self.worlds.get_mut(world) else {
            return UnmergeResult::Failed;
        };
        let Some(plot) = w.plot(id).filter(|p| p.is_claimed()) else {
            return UnmergeResult::Unclaimed;
        };
        if !bypass_owner && !plot.is_owner(requester) {
            return UnmergeResult::NotOwner;
        }
        if !w.is_merged(id, direction) {
            return UnmergeResult::NotMerged;
        }
        if !w.set_merged(id, direction, false) {
            return UnmergeResult::Failed;
        }
        self.dirty = true;
        UnmergeResult::Success
    }

    /// Apply `updater` to every plot in the merge group of `id` that shares
    /// its owner.
    pub fn update_merge_group(
        &mut self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        mut updater: impl FnMut(Plot) -> Plot,
    ) -> OwnerActionResult {
        let base_owner = match self.check_owned(world, id, requester, bypass_owner) {
            Ok(plot) => plot.owner(),
            Err(result) => return result,
        };
        self.update_group(world, id, |plot| {
            if plot.owner() == base_owner {
                updater(plot)
            } else {
                plot
            }
        });
        OwnerActionResult::Success
    }

    /// Copy the settings of `source` to every other plot in the group.
    pub fn sync_plot_settings(&mut self, world: &str, id: PlotId, source: &Plot) -> bool {
        let source_id = source.id();
        self.update_group(world, id, |plot| {
            if plot.id() == source_id {
                plot
            } else {
                plot.with_settings_from(source)
            }
        })
    }

    fn update_group(&mut self, world: &str, id: PlotId, mut updater: impl FnMut(Plot) -> Plot) -> bool {
        let Some(w) = self.worlds.get_mut(world) else {
            return false;
        };
        let mut changed = false;
        for member in w.merge_group(id) {
            changed |= w.update_plot(member, &mut updater);
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Shallow copy of every plot, unconfigured worlds included.
    pub fn snapshot(&self) -> PlotSnapshot {
        let mut worlds = self.detached.clone();
        for (name, world) in &self.worlds {
            worlds.insert(name.clone(), world.snapshot());
        }
        worlds
    }

    /// Build the next save job, or `None` when nothing changed.
    ///
    /// Full jobs are gated on the coarse dirty flag unless `force_full` is
    /// set. Incremental jobs carry exactly the plots written and removed
    /// since the previous job. Either way the change tracking is reset.
    pub fn take_save_job(&mut self, incremental: bool, force_full: bool) -> Option<SaveJob> {
        if force_full || !incremental {
            if !self.dirty && !force_full {
                return None;
            }
            self.dirty = false;
            for world in self.worlds.values_mut() {
                world.clear_changes();
            }
            return Some(SaveJob::Full(self.snapshot()));
        }

        let mut dirty = PlotSnapshot::new();
        let mut deleted = DeletedPlots::new();
        for (name, world) in self.worlds.iter_mut() {
            let changes = world.take_changes();
            if !changes.dirty.is_empty() {
                dirty.insert(name.clone(), changes.dirty);
            }
            if !changes.deleted.is_empty() {
                deleted.insert(name.clone(), changes.deleted);
            }
        }
        self.dirty = false;
        if dirty.is_empty() && deleted.is_empty() {
            return None;
        }
        Some(SaveJob::Incremental { dirty, deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotgrid_engine::plot::PlotFlag;

    const W: &str = "plotworld";

    fn state() -> PlotState {
        let grids = IndexMap::from([
            (W.to_string(), GridConfig::default()),
            ("other".to_string(), GridConfig::new(20, 5)),
        ]);
        PlotState::new(grids, OwnerIndex::new())
    }

    fn id(x: i32, z: i32) -> PlotId {
        PlotId::new(x, z)
    }

    fn home_of(s: &PlotState, owner: Uuid) -> Option<PlotId> {
        s.homes().home(owner).map(|loc| loc.id)
    }

    fn is_home(s: &PlotState, world: &str, plot: PlotId) -> bool {
        s.plot(world, plot).is_some_and(|p| p.is_home())
    }

    /// Owners with plots have exactly one home, and the index points at it.
    fn assert_home_invariant(s: &PlotState, owners: &[Uuid]) {
        for owner in owners {
            let owned = s.owned_plots(*owner);
            let homes: Vec<_> = owned
                .iter()
                .filter(|loc| is_home(s, &loc.world, loc.id))
                .collect();
            if owned.is_empty() {
                assert!(s.homes().home(*owner).is_none());
            } else {
                assert_eq!(homes.len(), 1, "owner {owner} homes {homes:?}");
                assert_eq!(s.homes().home(*owner).as_ref(), homes.first().copied());
            }
        }
    }

    #[test]
    fn test_claim_results() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        assert_eq!(s.claim(W, id(0, 0), alice, Some("alice".into()), 2), ClaimResult::Success);
        assert_eq!(s.claim(W, id(0, 0), bob, None, 2), ClaimResult::AlreadyClaimed);
        assert_eq!(s.claim(W, id(1, 0), alice, None, 2), ClaimResult::Success);
        assert_eq!(s.claim(W, id(2, 0), alice, None, 2), ClaimResult::TooMany);
        assert_eq!(s.claim(W, id(2, 0), alice, None, 0), ClaimResult::Success);
        assert_eq!(s.claim("nowhere", id(0, 0), alice, None, 0), ClaimResult::Failed);
        // Limit is per world.
        assert_eq!(s.claim("other", id(0, 0), alice, None, 2), ClaimResult::Success);
        assert!(s.is_dirty());
    }

    #[test]
    fn test_first_claim_becomes_home() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(3, 3), alice, None, 0);
        s.claim(W, id(0, 0), alice, None, 0);
        assert_eq!(home_of(&s, alice), Some(id(3, 3)));
        assert!(is_home(&s, W, id(3, 3)));
        assert!(!is_home(&s, W, id(0, 0)));
    }

    #[test]
    fn test_claim_then_delete_returns_to_default() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        assert_eq!(s.delete(W, id(0, 0), alice, false), OwnerActionResult::Success);
        assert!(s.plot(W, id(0, 0)).is_none());
        assert!(s.homes().home(alice).is_none());
        let Some(SaveJob::Full(worlds)) = s.take_save_job(false, false) else {
            panic!("expected a full save");
        };
        assert!(worlds[W].is_empty());
    }

    #[test]
    fn test_delete_checks_owner() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        assert_eq!(s.delete(W, id(0, 0), bob, false), OwnerActionResult::NotOwner);
        assert_eq!(s.delete(W, id(5, 5), alice, false), OwnerActionResult::Unclaimed);
        assert_eq!(s.delete("nowhere", id(0, 0), alice, false), OwnerActionResult::Unclaimed);
        assert_eq!(s.delete(W, id(0, 0), bob, true), OwnerActionResult::Success);
    }

    #[test]
    fn test_deleting_home_promotes_smallest_id() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(4, -2), alice, None, 0);
        s.claim(W, id(1, 7), alice, None, 0);
        s.delete(W, id(0, 0), alice, false);
        assert_eq!(home_of(&s, alice), Some(id(1, 7)));
        assert!(is_home(&s, W, id(1, 7)));
        assert_home_invariant(&s, &[alice]);
    }

    #[test]
    fn test_delete_cuts_merge_links() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        assert_eq!(s.merge(W, id(0, 0), MergeDirection::East, alice, false), MergeResult::Success);
        s.delete(W, id(1, 0), alice, false);
        let left = s.plot(W, id(0, 0)).unwrap();
        assert!(left.merged_directions().is_empty());
    }

    #[test]
    fn test_transfer_resets_plot_and_cuts_merges() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let friend = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        s.merge(W, id(0, 0), MergeDirection::East, alice, false);
        s.update_merge_group(W, id(0, 0), alice, false, |p| p.with_trusted_added(friend));

        let result = s.set_owner(W, id(0, 0), alice, false, bob, Some("bob".into()));
        assert_eq!(result, OwnerActionResult::Success);

        let given = s.plot(W, id(0, 0)).unwrap();
        assert!(given.is_owner(bob));
        assert!(given.trusted().is_empty());
        assert!(given.merged_directions().is_empty());
        let kept = s.plot(W, id(1, 0)).unwrap();
        assert!(kept.merged_directions().is_empty());
        assert!(kept.trusted().contains(&friend));

        assert_eq!(home_of(&s, alice), Some(id(1, 0)));
        assert_eq!(home_of(&s, bob), Some(id(0, 0)));
        assert_home_invariant(&s, &[alice, bob]);
    }

    #[test]
    fn test_transfer_to_same_owner_only_renames() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, Some("alice".into()), 0);
        s.claim(W, id(0, 1), alice, None, 0);
        s.merge(W, id(0, 0), MergeDirection::South, alice, false);

        s.set_owner(W, id(0, 0), alice, false, alice, Some("alicia".into()));
        let plot = s.plot(W, id(0, 0)).unwrap();
        assert_eq!(plot.owner_name(), Some("alicia"));
        assert!(plot.is_home());
        assert!(s.world(W).unwrap().is_merged(id(0, 0), MergeDirection::South));
    }

    #[test]
    fn test_transfer_keeps_receivers_existing_home() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(9, 9), bob, None, 0);
        s.set_owner(W, id(0, 0), alice, false, bob, None);
        assert_eq!(home_of(&s, bob), Some(id(9, 9)));
        assert!(!is_home(&s, W, id(0, 0)));
        assert!(s.homes().home(alice).is_none());
        assert_home_invariant(&s, &[alice, bob]);
    }

    #[test]
    fn test_set_home_moves_flag_across_worlds() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim("other", id(2, 2), alice, None, 0);
        assert_eq!(s.set_home(alice, "other", id(2, 2)), OwnerActionResult::Success);
        assert!(!is_home(&s, W, id(0, 0)));
        assert!(is_home(&s, "other", id(2, 2)));
        assert_eq!(s.homes().home(alice), Some(PlotLocation::new("other", id(2, 2))));

        let bob = Uuid::new_v4();
        assert_eq!(s.set_home(bob, W, id(0, 0)), OwnerActionResult::NotOwner);
        assert_eq!(s.set_home(bob, W, id(8, 8)), OwnerActionResult::Unclaimed);
    }

    #[test]
    fn test_merge_results() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        s.claim(W, id(0, 1), bob, None, 0);

        let east = MergeDirection::East;
        assert_eq!(s.merge("nowhere", id(0, 0), east, alice, false), MergeResult::Failed);
        assert_eq!(s.merge(W, id(5, 5), east, alice, false), MergeResult::Unclaimed);
        assert_eq!(s.merge(W, id(0, 0), east, bob, false), MergeResult::NotOwner);
        assert_eq!(s.merge(W, id(1, 0), east, alice, false), MergeResult::TargetUnclaimed);
        assert_eq!(
            s.merge(W, id(0, 0), MergeDirection::South, alice, false),
            MergeResult::NotSameOwner
        );
        assert_eq!(s.merge(W, id(0, 0), east, alice, false), MergeResult::Success);
        assert_eq!(s.merge(W, id(1, 0), MergeDirection::West, alice, false), MergeResult::AlreadyMerged);
        assert_eq!(s.merge(W, id(1, 0), MergeDirection::West, bob, true), MergeResult::AlreadyMerged);
    }

    #[test]
    fn test_merge_syncs_settings_from_source() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let friend = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        s.claim(W, id(2, 0), alice, None, 0);
        s.merge(W, id(1, 0), MergeDirection::East, alice, false);
        s.update_merge_group(W, id(1, 0), alice, false, |p| p.with_flag(PlotFlag::Pvp, false));

        // Merge from (0, 0): (0, 0)'s settings win across the group.
        s.update_merge_group(W, id(0, 0), alice, false, |p| p.with_trusted_added(friend));
        assert_eq!(s.merge(W, id(0, 0), MergeDirection::East, alice, false), MergeResult::Success);
        for x in 0..3 {
            let plot = s.plot(W, id(x, 0)).unwrap();
            assert!(plot.trusted().contains(&friend), "x = {x}");
            assert!(plot.flag(PlotFlag::Pvp), "x = {x}");
        }
    }

    #[test]
    fn test_unmerge_results() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(0, 1), alice, None, 0);
        let south = MergeDirection::South;
        assert_eq!(s.unmerge(W, id(0, 0), south, alice, false), UnmergeResult::NotMerged);
        s.merge(W, id(0, 0), south, alice, false);
        assert_eq!(s.unmerge("nowhere", id(0, 0), south, alice, false), UnmergeResult::Failed);
        assert_eq!(s.unmerge(W, id(3, 3), south, alice, false), UnmergeResult::Unclaimed);
        assert_eq!(s.unmerge(W, id(0, 0), south, bob, false), UnmergeResult::NotOwner);
        assert_eq!(s.unmerge(W, id(0, 1), MergeDirection::North, alice, false), UnmergeResult::Success);
        assert!(!s.world(W).unwrap().is_merged(id(0, 0), south));
    }

    #[test]
    fn test_group_edit_skips_other_owners() {
        let mut s = state();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        s.claim(W, id(2, 0), bob, None, 0);
        s.merge(W, id(0, 0), MergeDirection::East, alice, false);

        let result = s.update_merge_group(W, id(1, 0), alice, false, |p| p.with_flag(PlotFlag::Build, true));
        assert_eq!(result, OwnerActionResult::Success);
        assert!(s.plot(W, id(0, 0)).unwrap().flag(PlotFlag::Build));
        assert!(s.plot(W, id(1, 0)).unwrap().flag(PlotFlag::Build));
        assert!(!s.plot(W, id(2, 0)).unwrap().flag(PlotFlag::Build));

        let denied = s.update_merge_group(W, id(2, 0), alice, false, |p| p.with_home(false));
        assert_eq!(denied, OwnerActionResult::NotOwner);
    }

    #[test]
    fn test_home_invariant_over_mixed_sequence() {
        let mut s = state();
        let owners: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, owner) in owners.iter().enumerate() {
            for x in 0..3 {
                s.claim(W, id(x, i as i32), *owner, None, 0);
            }
        }
        assert_home_invariant(&s, &owners);
        s.delete(W, id(0, 0), owners[0], false);
        assert_home_invariant(&s, &owners);
        s.set_owner(W, id(0, 1), owners[1], false, owners[0], None);
        assert_home_invariant(&s, &owners);
        s.set_home(owners[2], W, id(2, 2));
        s.delete(W, id(2, 2), owners[2], false);
        assert_home_invariant(&s, &owners);
        for x in 0..3 {
            s.delete(W, id(x, 2), owners[2], true);
        }
        assert_home_invariant(&s, &owners);
    }

    #[test]
    fn test_load_repairs_and_keeps_unknown_worlds() {
        let alice = Uuid::new_v4();
        let a = Plot::new(id(0, 0))
            .with_owner(Some(alice), None)
            .with_merged_direction_added(MergeDirection::East);
        let stray = Plot::new(id(4, 4)).with_owner(Some(alice), None);
        let stored = PlotSnapshot::from([
            (W.to_string(), [(a.id(), Arc::new(a))].into_iter().collect()),
            ("retired".to_string(), [(stray.id(), Arc::new(stray))].into_iter().collect()),
        ]);

        let mut s = state();
        assert_eq!(s.load(stored), 1);
        assert!(s.is_dirty());
        let plot = s.plot(W, id(0, 0)).unwrap();
        assert!(plot.merged_directions().is_empty());
        assert!(plot.is_home());
        assert_eq!(home_of(&s, alice), Some(id(0, 0)));

        let Some(SaveJob::Full(worlds)) = s.take_save_job(false, false) else {
            panic!("expected a full save");
        };
        assert_eq!(worlds["retired"].len(), 1);
        assert!(s.take_save_job(false, false).is_none());
    }

    #[test]
    fn test_incremental_job_carries_changes_only() {
        let mut s = state();
        let alice = Uuid::new_v4();
        s.claim(W, id(0, 0), alice, None, 0);
        s.claim(W, id(1, 0), alice, None, 0);
        assert!(matches!(s.take_save_job(true, false), Some(SaveJob::Incremental { .. })));

        s.delete(W, id(1, 0), alice, false);
        let Some(SaveJob::Incremental { dirty, deleted }) = s.take_save_job(true, false) else {
            panic!("expected an incremental save");
        };
        assert!(dirty.is_empty());
        assert!(deleted[W].contains(&id(1, 0)));
        assert!(s.take_save_job(true, false).is_none());
        assert!(matches!(s.take_save_job(true, true), Some(SaveJob::Full(_))));
    }
}
