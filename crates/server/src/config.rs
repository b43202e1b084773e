//! TOML configuration: plot worlds, storage backend, autosave.
//!
//! A missing file is created with defaults on first start. Worlds keep the
//! order they are declared in, which is also the order the owner index uses
//! when it has to pick a home across worlds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use plotgrid_engine::world::grid::GridConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub settings: Settings,
    pub storage: StorageConfig,
    pub worlds: IndexMap<String, PlotWorldConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            storage: StorageConfig::default(),
            worlds: IndexMap::from([("plotworld".to_string(), PlotWorldConfig::default())]),
        }
    }
}

impl ServerConfig {
    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = ServerConfig::default();
            config.save(path)?;
            tracing::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if config.worlds.is_empty() {
            tracing::warn!("No plot worlds configured; add entries under [worlds] in {}", path.display());
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
    }

    /// Grid geometry per world, in declaration order.
    pub fn grids(&self) -> IndexMap<String, GridConfig> {
        self.worlds
            .iter()
            .map(|(name, world)| (name.clone(), world.grid()))
            .collect()
    }

    pub fn world(&self, name: &str) -> Option<&PlotWorldConfig> {
        self.worlds.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Keep non-members from editing road blocks.
    pub protect_roads: bool,
    /// Seconds between background saves; 0 disables autosave.
    pub auto_save_interval_secs: u64,
    pub use_action_bar: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protect_roads: true,
            auto_save_interval_secs: 300,
            use_action_bar: true,
        }
    }
}

impl Settings {
    pub fn auto_save_interval(&self) -> Option<Duration> {
        (self.auto_save_interval_secs > 0).then(|| Duration::from_secs(self.auto_save_interval_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON region files on disk.
    Region,
    /// Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Region,
            dir: PathBuf::from("plots"),
        }
    }
}

/// One plot world. Only the two sizes matter to the grid; the rest is
/// carried for the gameplay layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlotWorldConfig {
    pub plot_size: i32,
    pub road_size: i32,
    pub ground_y: i32,
    /// 0 means unlimited.
    pub max_plots_per_player: usize,
    pub claim_price: f64,
    pub sell_refund: f64,
    pub teleport_on_claim: bool,
    pub road_edge_block: String,
    pub road_corner_block: String,
}

impl Default for PlotWorldConfig {
    fn default() -> Self {
        Self {
            plot_size: 35,
            road_size: 7,
            ground_y: 64,
            max_plots_per_player: 2,
            claim_price: 100.0,
            sell_refund: 50.0,
            teleport_on_claim: true,
            road_edge_block: "minecraft:smooth_stone_slab".into(),
            road_corner_block: "minecraft:smooth_stone_slab".into(),
        }
    }
}

impl PlotWorldConfig {
    pub fn grid(&self) -> GridConfig {
        GridConfig::new(self.plot_size, self.road_size)
    }
}
