//! Voronoi Drift
//!
//! Windowed host for the animated Voronoi engine: winit supplies the
//! lifecycle events, wgpu the output surface.

mod app;
mod gpu;

use std::sync::Arc;

use winit::event_loop::{ControlFlow, EventLoop};

use voronoi_drift::{EngineConfig, MetricsLogger};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Voronoi Drift");
    let config = EngineConfig::from_env();
    log::info!(
        "Sites: {}, pixel step: {}, markers: {}, spatial grid: {}",
        config.site_count,
        config.pixel_step,
        config.draw_markers,
        config.grid_enabled()
    );

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = app::App::new(config, Arc::new(MetricsLogger::default()));
    event_loop.run_app(&mut app).expect("Event loop error");
}
