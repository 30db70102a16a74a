use anyhow::Context;
use overlay_visualizer::{OverlayBus, ServerConfig, spawn_overlay_actor, start_server};
use pavement_overlay::OverlayConfig;
use pavement_overlay::core_modules::detection::DetectionDataset;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pavement_overlay=info,overlay_visualizer=info")),
        )
        .init();

    let config = OverlayConfig::default().with_env_overrides();
    config.validate()?;
    let surface = config.raster_surface(
        env_or("PO_WIDTH", 1280),
        env_or("PO_HEIGHT", 720),
    )?;

    let bus = OverlayBus::new(16);
    let (control, actor) = spawn_overlay_actor(config.clone(), surface, bus.clone());

    let loaded = if let Ok(path) = std::env::var("PO_DATASET") {
        let dataset = DetectionDataset::from_path(&path)
            .with_context(|| format!("reading detection dataset {path}"))?;
        let fps = dataset.effective_fps(config.fps);
        let duration = std::env::var("PO_DURATION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or_else(|| dataset.covered_secs(fps));
        info!(path = %path, duration, "loading dataset");
        control.load(dataset, duration).await?;
        true
    } else {
        warn!("PO_DATASET not set; serving an empty overlay");
        false
    };

    match start_server(bus, ServerConfig::from_env(), control.clone()).await {
        Ok(server) => {
            server.await.ok();
        }
        Err(e) if !loaded => return Err(e),
        Err(e) => {
            // Headless: play once and print what was found.
            warn!(error = %e, "no web server, playing headless");
            control.play().await?;
            let mut snapshot = control.snapshot().await?;
            while !snapshot.summary_visible {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                snapshot = control.snapshot().await?;
            }
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            control.shutdown().await?;
            actor.await.ok();
        }
    }
    Ok(())
}

fn env_or(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
