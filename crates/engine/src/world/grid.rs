//! Coordinate-to-plot addressing.
//!
//! Along each axis the plane repeats with period `total = plot_size +
//! road_size`. Within one period, offsets `1..=plot_size` are plot and the
//! rest is road. Road strips between merged plots resolve to the plot that
//! owns them, without any per-block state.

use crate::plot::{MergeDirection, PlotBounds, PlotId};

use super::PlotWorld;

/// Sizes of the repeating grid. Construct through `GridConfig::new` so the
/// sizes are normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridConfig {
    plot_size: i32,
    road_size: i32,
}

impl GridConfig {
    /// Plot size is clamped to at least 1, road size to at least 0.
    pub const fn new(plot_size: i32, road_size: i32) -> Self {
        Self {
            plot_size: if plot_size < 1 { 1 } else { plot_size },
            road_size: if road_size < 0 { 0 } else { road_size },
        }
    }

    pub const fn plot_size(&self) -> i32 {
        self.plot_size
    }

    pub const fn road_size(&self) -> i32 {
        self.road_size
    }

    pub const fn total_size(&self) -> i32 {
        self.plot_size + self.road_size
    }

    /// Whether a per-axis offset falls on plot rather than road.
    pub const fn is_inside(&self, offset: i32) -> bool {
        offset > 0 && offset <= self.plot_size
    }

    /// Block rectangle of a single plot, ignoring merges.
    pub fn plot_bounds(&self, id: PlotId) -> PlotBounds {
        let total = self.total_size();
        let min_x = id.x.wrapping_mul(total);
        let min_z = id.z.wrapping_mul(total);
        PlotBounds::new(
            min_x,
            min_x.wrapping_add(self.plot_size - 1),
            min_z,
            min_z.wrapping_add(self.plot_size - 1),
        )
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new(35, 7)
    }
}

/// Grid cell containing coordinate `c`. Floor division, so negative
/// coordinates land in negative cells.
pub const fn cell_index(c: i32, total: i32) -> i32 {
    c.div_euclid(total)
}

/// Position of `c` within its period, shifted by one so that offset 0 is the
/// last road block before the cell and `1..=plot_size` is the plot.
pub const fn cell_offset(c: i32, total: i32) -> i32 {
    (c as i64 + 1).rem_euclid(total as i64) as i32
}

impl PlotWorld {
    /// Plot that owns block `(x, z)`, or `None` for road.
    ///
    /// Road strips count as part of a plot only when the merge that opens
    /// them is effective. An intersection needs the whole 2x2 block merged.
    pub fn plot_id_at(&self, x: i32, z: i32) -> Option<PlotId> {
        let total = self.grid.total_size();
        let id = PlotId::new(cell_index(x, total), cell_index(z, total));
        let inside_x = self.grid.is_inside(cell_offset(x, total));
        let inside_z = self.grid.is_inside(cell_offset(z, total));

        match (inside_x, inside_z) {
            (true, true) => Some(id),
            // Horizontal strip below the plot.
            (true, false) => self.is_merged(id, MergeDirection::South).then_some(id),
            // Vertical strip east of the plot.
            (false, true) => self.is_merged(id, MergeDirection::East).then_some(id),
            (false, false) => {
                let south = id.adjacent(MergeDirection::South);
                let east = id.adjacent(MergeDirection::East);
                let closed = self.is_merged(id, MergeDirection::East)
                    && self.is_merged(south, MergeDirection::East)
                    && self.is_merged(id, MergeDirection::South)
                    && self.is_merged(east, MergeDirection::South);
                closed.then_some(id)
            }
        }
    }

    pub fn plot_bounds(&self, id: PlotId) -> PlotBounds {
        self.grid.plot_bounds(id)
    }

    /// Union of the rectangles of every plot merged with `id`.
    pub fn merged_plot_bounds(&self, id: PlotId) -> PlotBounds {
        let single = self.grid.plot_bounds(id);
        self.merge_group(id)
            .into_iter()
            .map(|member| self.grid.plot_bounds(member))
            .reduce(|acc, b| acc.union(&b))
            .unwrap_or(single)
    }
}
