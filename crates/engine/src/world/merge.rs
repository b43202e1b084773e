//! Merge links between adjacent plots.
//!
//! A merge is stored as a pair of direction bits, one on each plot. It is
//! only *effective* when both bits are present and both plots are claimed by
//! the same owner. Everything that reads merges (addressing, groups, bounds)
//! uses the effective relation, so a stale half-link never leaks through.

use std::collections::{BTreeSet, VecDeque};

use crate::plot::{MergeDirection, PlotId};

use super::PlotWorld;

impl PlotWorld {
    pub fn adjacent_plot_id(&self, id: PlotId, direction: MergeDirection) -> PlotId {
        id.adjacent(direction)
    }

    /// Effective merge between `id` and its neighbour in `direction`.
    pub fn is_merged(&self, id: PlotId, direction: MergeDirection) -> bool {
        let Some(plot) = self.plot(id) else {
            return false;
        };
        if !plot.is_claimed() || !plot.has_merge_bit(direction) {
            return false;
        }
        let Some(neighbor) = self.plot(id.adjacent(direction)) else {
            return false;
        };
        neighbor.is_claimed()
            && neighbor.has_merge_bit(direction.opposite())
            && neighbor.owner() == plot.owner()
    }

    /// Set or clear the link between `id` and its neighbour on both sides.
    /// Returns false without touching anything if either plot is missing.
    pub fn set_merged(&mut self, id: PlotId, direction: MergeDirection, merged: bool) -> bool {
        let neighbor_id = id.adjacent(direction);
        if self.plot(id).is_none() || self.plot(neighbor_id).is_none() {
            return false;
        }
        if merged {
            self.update_plot(id, |p| p.with_merged_direction_added(direction));
            self.update_plot(neighbor_id, |p| p.with_merged_direction_added(direction.opposite()));
        } else {
            self.update_plot(id, |p| p.with_merged_direction_removed(direction));
            self.update_plot(neighbor_id, |p| {
                p.with_merged_direction_removed(direction.opposite())
            });
        }
        true
    }

    /// Drop every merge bit on `id` along with the matching bit on each
    /// neighbour. Returns whether anything changed.
    pub fn clear_merged_connections(&mut self, id: PlotId) -> bool {
        let Some(plot) = self.plot(id) else {
            return false;
        };
        let directions = plot.merged_directions();
        let mut changed = false;
        for direction in MergeDirection::ALL {
            changed |= self.update_plot(id.adjacent(direction), |p| {
                p.with_merged_direction_removed(direction.opposite())
            });
        }
        if !directions.is_empty() {
            changed |= self.update_plot(id, |p| p.with_merged_directions_cleared());
        }
        changed
    }

    /// Every plot connected to `id` through effective merges, `id` included.
    /// Empty when `id` is not stored.
    pub fn merge_group(&self, id: PlotId) -> BTreeSet<PlotId> {
        let mut group = BTreeSet::new();
        if self.plot(id).is_none() {
            return group;
        }
        let mut queue = VecDeque::from([id]);
        group.insert(id);
        while let Some(current) = queue.pop_front() {
            for direction in MergeDirection::ALL {
                if !self.is_merged(current, direction) {
                    continue;
                }
                let next = current.adjacent(direction);
                if group.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        group
    }

    /// Canonical representative of the group: its smallest id.
    pub fn merge_root(&self, id: PlotId) -> PlotId {
        self.merge_group(id).first().copied().unwrap_or(id)
    }

    /// Repair merge bits after a bulk load. Strips any bit whose neighbour
    /// is missing, unclaimed, owned by someone else, or does not carry the
    /// reciprocal bit. Returns whether anything changed.
    pub fn normalize_merges(&mut self) -> bool {
        let mut broken: Vec<(PlotId, MergeDirection)> = Vec::new();
        for (id, plot) in self.plots() {
            for direction in plot.merged_directions().iter() {
                if !self.is_merged(*id, direction) {
                    broken.push((*id, direction));
                }
            }
        }
        if broken.is_empty() {
            return false;
        }
        tracing::debug!(world = %self.name(), links = broken.len(), "Dropping broken merge links");
        for (id, direction) in broken {
            self.update_plot(id, |p| p.with_merged_direction_removed(direction));
        }
        true
    }
}
