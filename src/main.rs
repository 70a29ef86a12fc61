mod app;
mod color;
mod config;
mod dashboard;
mod data;
mod export;
mod mock;
mod render;
mod selection;
mod store;
mod view;

use config::DashboardConfig;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let project_dir = config::resolve_project_dir();
    let config = DashboardConfig::load(&project_dir).unwrap_or_else(|e| {
        warn!("config ignored, using defaults: {e:#}");
        DashboardConfig::default()
    });

    let title = config.title.clone();
    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title(&title)
            .with_inner_size([1200.0, 640.0]),
        ..Default::default()
    };

    eframe::run_native(
        &title,
        native_options,
        Box::new(move |cc| Ok(Box::new(app::ReconApp::new(cc, config, project_dir)))),
    )
}
