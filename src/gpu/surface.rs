use std::sync::Arc;

use winit::window::Window;

use voronoi_drift::{MarkerInstance, PipelineError, PixelBuffer, Rect, Surface};

use super::{BlitPipeline, MarkerPipeline};

/// Swapchain image being drawn this tick
pub struct SurfaceFrame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

/// Window swapchain plus the two passes the presenter needs
pub struct GpuSurface {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    blit: BlitPipeline,
    markers: MarkerPipeline,
}

impl GpuSurface {
    pub async fn new(window: Arc<Window>) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .expect("Failed to create surface");

        // One small texture upload per frame; the integrated GPU is plenty
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");
        let info = adapter.get_info();
        log::info!("Presenting on {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("voronoi-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let config = swapchain_config(&surface, &adapter, size.width, size.height);
        surface.configure(&device, &config);
        log::debug!("Swapchain format {:?}, {:?}", config.format, config.present_mode);

        let blit = BlitPipeline::new(&device, config.format);
        let markers = MarkerPipeline::new(&device, config.format);
        Self {
            surface,
            device,
            queue,
            config,
            blit,
            markers,
        }
    }

    /// Zero-sized windows keep the previous swapchain
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

/// Vsynced swapchain preferring an sRGB format so the blit needs no conversion
fn swapchain_config(
    surface: &wgpu::Surface<'_>,
    adapter: &wgpu::Adapter,
    width: u32,
    height: u32,
) -> wgpu::SurfaceConfiguration {
    let caps = surface.get_capabilities(adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(wgpu::TextureFormat::is_srgb)
        .or_else(|| caps.formats.first().copied())
        .expect("Surface not supported by adapter");

    wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode: wgpu::PresentMode::AutoVsync,
        desired_maximum_frame_latency: 2,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: Vec::new(),
    }
}

impl Surface for GpuSurface {
    type Target = SurfaceFrame;

    fn acquire_draw_target(&mut self) -> Option<SurfaceFrame> {
        let output = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated; reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(|e| log::warn!("Surface still unavailable: {}", e))
                    .ok()?
            }
            Err(e) => {
                log::warn!("Surface unavailable: {}", e);
                return None;
            }
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame-encoder"),
            });
        Some(SurfaceFrame {
            output,
            view,
            encoder,
        })
    }

    fn draw_scaled(
        &mut self,
        target: &mut SurfaceFrame,
        buffer: &PixelBuffer,
        src: Rect,
        dst: Rect,
        filtered: bool,
    ) {
        let (width, height) = self.size();
        // A resize may land between frames; never draw past the surface
        let dst = Rect {
            width: dst.width.min(width.saturating_sub(dst.x)),
            height: dst.height.min(height.saturating_sub(dst.y)),
            ..dst
        };
        if dst.width == 0 || dst.height == 0 {
            return;
        }

        self.blit.upload(&self.device, &self.queue, buffer);
        self.blit.draw(
            &self.device,
            &self.queue,
            &mut target.encoder,
            &target.view,
            src,
            dst,
            filtered,
        );
    }

    fn draw_markers(&mut self, target: &mut SurfaceFrame, markers: &[MarkerInstance]) {
        self.markers
            .prepare(&self.device, &self.queue, markers, self.size());
        self.markers
            .draw(&mut target.encoder, &target.view, markers.len());
    }

    fn release_draw_target(&mut self, target: SurfaceFrame) -> Result<(), PipelineError> {
        let SurfaceFrame {
            output, encoder, ..
        } = target;
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}
