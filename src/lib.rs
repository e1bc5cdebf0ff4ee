//! Animated Voronoi diagram engine.
//!
//! Moving sites bounce around the viewport; every frame a low-resolution
//! nearest-site raster is generated on a background thread and handed to the
//! presenting thread through a bounded, double-buffered channel.

pub mod config;
pub mod engine;
pub mod error;
pub mod gesture;
pub mod metrics;
pub mod pipeline;
pub mod raster;
pub mod simulation;

pub use config::EngineConfig;
pub use engine::VoronoiEngine;
pub use error::PipelineError;
pub use metrics::{MetricsLogger, MetricsSink, NoopMetrics};
pub use pipeline::{MarkerInstance, PipelineState, PresentOutcome, Rect, Surface};
pub use raster::PixelBuffer;
