mod blit;
mod markers;
mod surface;

pub use blit::BlitPipeline;
pub use markers::MarkerPipeline;
pub use surface::GpuSurface;
