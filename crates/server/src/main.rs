use std::path::PathBuf;

use plotgrid_engine::plot::{MergeDirection, PlotFlag, PlotId};
use plotgrid_server::config::ServerConfig;
use plotgrid_server::persistence::{self, MemoryStorage};
use plotgrid_server::service::PlotService;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let demo_mode = std::env::args().any(|a| a == "--demo");
    let config_path: PathBuf = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "plots.toml".into())
        .into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    if demo_mode {
        if let Err(e) = tokio::task::spawn_blocking(run_demo).await {
            tracing::error!("Demo panicked: {}", e);
        }
        return;
    }

    tracing::info!("Plot grid server");

    let config = match ServerConfig::load_or_create(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load {}: {:#}", config_path.display(), e);
            return;
        }
    };
    for (name, world) in &config.worlds {
        tracing::info!(
            "World '{}': plot {} road {} (max {} plots per player)",
            name,
            world.plot_size,
            world.road_size,
            world.max_plots_per_player
        );
    }

    let storage = persistence::open_storage(&config.storage);
    let service = match PlotService::start(config.grids(), storage) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start plot service: {:#}", e);
            return;
        }
    };

    // ── Periodic autosave ────────────────────────────────────────────────
    if let Some(period) = config.settings.auto_save_interval() {
        let autosave = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick is immediate, skip it
            loop {
                interval.tick().await;
                if !autosave.is_running() {
                    break;
                }
                tracing::debug!("Autosave requested");
                autosave.request_save();
            }
        });
    } else {
        tracing::info!("Autosave disabled");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Ctrl+C received, shutting down...");

    // ── Save on shutdown ─────────────────────────────────────────────────
    let closing = service.clone();
    let saved = tokio::task::spawn_blocking(move || {
        let result = closing.save();
        closing.shutdown();
        result
    })
    .await;
    match saved {
        Ok(Ok(true)) => tracing::info!("Shutdown save complete"),
        Ok(Ok(false)) => tracing::info!("Nothing to save"),
        Ok(Err(e)) => tracing::error!("Shutdown save failed: {:#}", e),
        Err(e) => tracing::error!("Shutdown task panicked: {}", e),
    }

    match serde_json::to_string(&service.metrics()) {
        Ok(json) => tracing::info!("Save metrics: {}", json),
        Err(e) => tracing::warn!("Failed to encode save metrics: {}", e),
    }
}

/// Scripted claim/merge walk-through against in-memory storage.
fn run_demo() {
    let config = ServerConfig::default();
    let Some((world, world_config)) = config.worlds.first() else {
        tracing::error!("Default config has no worlds");
        return;
    };
    let max_plots = world_config.max_plots_per_player;
    let storage = MemoryStorage::new();
    let service = match PlotService::start(config.grids(), Box::new(storage.clone())) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start plot service: {:#}", e);
            return;
        }
    };

    tracing::info!("Plot grid demo on world '{}'", world);

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let origin = PlotId::new(0, 0);
    let east = PlotId::new(1, 0);

    let steps = || -> Result<(), plotgrid_server::service::results::ServiceError> {
        let claimed = service.claim(world, origin, alice, Some("alice".into()), max_plots).wait()?;
        tracing::info!("alice claims {}: {:?}", origin, claimed);
        let claimed = service.claim(world, east, alice, Some("alice".into()), max_plots).wait()?;
        tracing::info!("alice claims {}: {:?}", east, claimed);
        let stolen = service.claim(world, east, bob, Some("bob".into()), max_plots).wait()?;
        tracing::info!("bob claims {}: {:?}", east, stolen);

        let merged = service.merge(world, origin, MergeDirection::East, alice, false).wait()?;
        tracing::info!("alice merges {} east: {:?}", origin, merged);
        let group = service.merge_group(world, origin).wait()?;
        tracing::info!("Merge group of {}: {:?}", origin, group);
        tracing::info!("Merged bounds: {:?}", service.merged_bounds(world, east).wait()?);

        // A point on the road between the two plots now belongs to the group.
        let grid = world_config.grid();
        let road_x = grid.plot_size() + 1;
        tracing::info!("Block ({}, 5) is in plot {:?}", road_x, service.plot_at(world, road_x, 5).wait()?);

        service.set_flag(world, origin, alice, false, PlotFlag::Pvp, Some(false)).wait()?;
        service.add_trusted(world, origin, alice, false, bob).wait()?;
        if let Some(plot) = service.plot(world, east).wait()? {
            tracing::info!(
                "{} pvp={} bob can build={}",
                east,
                plot.flag(PlotFlag::Pvp),
                plot.can_build(bob)
            );
        }

        tracing::info!("alice's home: {:?}", service.find_home(alice));
        let deleted = service.delete(world, origin, alice, false).wait()?;
        tracing::info!("alice deletes {}: {:?}", origin, deleted);
        tracing::info!("alice's home now: {:?}", service.find_home(alice));
        tracing::info!("Next free plot: {:?}", service.find_next_free(world).wait()?);
        Ok(())
    };
    if let Err(e) = steps() {
        tracing::error!("Demo aborted: {}", e);
    }

    match service.save() {
        Ok(written) => tracing::info!(
            "Saved: {} ({} plots stored)",
            written,
            persistence::plot_count(&storage.contents())
        ),
        Err(e) => tracing::error!("Save failed: {:#}", e),
    }
    service.shutdown();
}
