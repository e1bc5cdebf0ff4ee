use wgpu::{
    BindGroup, BindGroupLayout, Buffer, BufferUsages, Device, Queue, RenderPipeline, Sampler,
    Texture, TextureFormat, TextureView,
};

use voronoi_drift::{PixelBuffer, Rect};

/// Source sub-rectangle in normalized texture coordinates (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BlitParams {
    uv_offset: [f32; 2],
    uv_scale: [f32; 2],
}

/// Frame texture sized to the current raster, rebuilt when that size changes
struct FrameTexture {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
}

/// Uploads a [`PixelBuffer`] and stretches it over a region of the surface
pub struct BlitPipeline {
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    linear: Sampler,
    nearest: Sampler,
    params_buffer: Buffer,
    texture_format: TextureFormat,
    frame: Option<FrameTexture>,
}

impl BlitPipeline {
    pub fn new(device: &Device, surface_format: TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = |label: &'static str, filter: wgpu::FilterMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blit-params"),
            size: std::mem::size_of::<BlitParams>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Raster bytes are sRGB-encoded; let sampling decode them when the surface does too
        let texture_format = if surface_format.is_srgb() {
            TextureFormat::Rgba8UnormSrgb
        } else {
            TextureFormat::Rgba8Unorm
        };

        Self {
            pipeline,
            bind_group_layout,
            linear: sampler("blit-sampler-linear", wgpu::FilterMode::Linear),
            nearest: sampler("blit-sampler-nearest", wgpu::FilterMode::Nearest),
            params_buffer,
            texture_format,
            frame: None,
        }
    }

    /// Copy the raster into the frame texture, reallocating on size change
    pub fn upload(&mut self, device: &Device, queue: &Queue, buffer: &PixelBuffer) {
        let (width, height) = (buffer.width(), buffer.height());
        let stale = self
            .frame
            .as_ref()
            .map_or(true, |f| f.width != width || f.height != height);
        if stale {
            log::debug!("Allocating {}x{} frame texture", width, height);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame-texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.frame = Some(FrameTexture {
                texture,
                view,
                width,
                height,
            });
        }

        let Some(frame) = self.frame.as_ref() else {
            return;
        };
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            buffer.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Stretch `src` of the uploaded texture over `dst` of `view`
    pub fn draw(
        &self,
        device: &Device,
        queue: &Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &TextureView,
        src: Rect,
        dst: Rect,
        filtered: bool,
    ) {
        let Some(frame) = self.frame.as_ref() else {
            return;
        };

        let params = BlitParams {
            uv_offset: [
                src.x as f32 / frame.width as f32,
                src.y as f32 / frame.height as f32,
            ],
            uv_scale: [
                src.width as f32 / frame.width as f32,
                src.height as f32 / frame.height as f32,
            ],
        };
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = self.bind_group(device, &frame.view, filtered);

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_viewport(
            dst.x as f32,
            dst.y as f32,
            dst.width as f32,
            dst.height as f32,
            0.0,
            1.0,
        );
        pass.draw(0..3, 0..1);
    }

    fn bind_group(&self, device: &Device, texture: &TextureView, filtered: bool) -> BindGroup {
        let sampler = if filtered { &self.linear } else { &self.nearest };
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        })
    }
}
