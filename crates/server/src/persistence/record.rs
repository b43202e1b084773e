//! Serialized form of a plot.
//!
//! Identifiers are kept as strings so a single bad entry is skipped with a
//! warning instead of failing the whole file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plotgrid_engine::plot::{MergeDirection, Plot, PlotId};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PlotRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub home: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PlotRecord {
    pub fn from_plot(plot: &Plot) -> Self {
        Self {
            owner: plot.owner().map(|o| o.to_string()),
            owner_name: plot.owner_name().map(str::to_string),
            home: plot.is_home(),
            trusted: plot.trusted().iter().map(Uuid::to_string).collect(),
            denied: plot.denied().iter().map(Uuid::to_string).collect(),
            flags: plot.flags().clone(),
            merged: plot
                .merged_directions()
                .iter()
                .map(|d| d.name().to_string())
                .collect(),
        }
    }

    /// Rebuild the plot. Returns `None` for records without a valid owner,
    /// which can only describe the default plot. `origin` names the source
    /// in warnings.
    pub fn into_plot(self, id: PlotId, origin: &str) -> Option<Plot> {
        let owner = match self.owner.as_deref().map(Uuid::parse_str) {
            Some(Ok(owner)) => owner,
            Some(Err(_)) => {
                tracing::warn!("Skipping plot {} in {}: bad owner UUID", id, origin);
                return None;
            }
            None => return None,
        };

        let mut plot = Plot::new(id)
            .with_owner(Some(owner), self.owner_name)
            .with_home(self.home);
        for raw in &self.trusted {
            match Uuid::parse_str(raw) {
                Ok(player) => plot = plot.with_trusted_added(player),
                Err(_) => tracing::warn!("Ignoring trusted entry {:?} on plot {} in {}", raw, id, origin),
            }
        }
        for raw in &self.denied {
            match Uuid::parse_str(raw) {
                Ok(player) => plot = plot.with_denied_added(player),
                Err(_) => tracing::warn!("Ignoring denied entry {:?} on plot {} in {}", raw, id, origin),
            }
        }
        for (key, value) in &self.flags {
            plot = plot.with_flag_raw(key, Some(value));
        }
        for raw in &self.merged {
            match raw.parse::<MergeDirection>() {
                Ok(direction) => plot = plot.with_merged_direction_added(direction),
                Err(_) => tracing::warn!("Ignoring merge direction {:?} on plot {} in {}", raw, id, origin),
            }
        }
        Some(plot)
    }
}
