//! Headless `wgpu` implementation of the chain's `RenderBackend` seam.
//!
//! Presentation is the host's business; this backend renders the terminal
//! pass into an internal display texture the host can read back or copy to
//! its swapchain. Pass shaders are WGSL modules exposing `vs_main`/`fs_main`
//! with the stock binding layout (see `blit.wgsl`); passes without a shader
//! reference get the embedded pass-through module.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::{DeviceExt, TextureDataOrder};

use chain::{BackendError, DrawCall, Dimensions, FrameBuffer, PixelFormat, RenderBackend};

const STOCK_SHADER: &str = include_str!("blit.wgsl");
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Dynamic parameter values carried per draw, as four vec4 uniform rows.
const MAX_PARAMS: usize = 16;

pub struct WgpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Dimensions,
}

impl WgpuTarget {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn size(&self) -> Dimensions {
        self.size
    }
}

pub struct WgpuShader {
    module: wgpu::ShaderModule,
    id: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PassUniforms {
    /// input width/height, output width/height.
    source_size: [f32; 4],
    params: [[f32; 4]; 4],
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: u64,
    lut_count: usize,
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    group0_layout: wgpu::BindGroupLayout,
    lut_layout: Option<wgpu::BindGroupLayout>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    pipelines: HashMap<PipelineKey, CachedPipeline>,
    display: Option<WgpuTarget>,
    next_shader_id: u64,
}

impl WgpuBackend {
    /// Brings up a headless instance/adapter/device.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("render chain device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let linear_sampler = create_sampler(&device, wgpu::FilterMode::Linear);
        let nearest_sampler = create_sampler(&device, wgpu::FilterMode::Nearest);

        Ok(Self {
            device,
            queue,
            linear_sampler,
            nearest_sampler,
            pipelines: HashMap::new(),
            display: None,
            next_shader_id: 0,
        })
    }

    /// The texture the terminal pass last rendered into, if any frame has
    /// been submitted.
    pub fn display_target(&self) -> Option<&WgpuTarget> {
        self.display.as_ref()
    }

    fn sampler(&self, linear: bool) -> &wgpu::Sampler {
        if linear {
            &self.linear_sampler
        } else {
            &self.nearest_sampler
        }
    }

    fn make_target(&self, width: u32, height: u32) -> WgpuTarget {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pass target"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        WgpuTarget {
            texture,
            view,
            size: Dimensions::new(width, height),
        }
    }

    fn ensure_display(&mut self, size: Dimensions) {
        let stale = self
            .display
            .as_ref()
            .map(|target| target.size != size)
            .unwrap_or(true);
        if stale {
            self.display = Some(self.make_target(size.width, size.height));
        }
    }

    fn ensure_pipeline(
        &mut self,
        shader: &WgpuShader,
        lut_count: usize,
    ) -> Result<PipelineKey, BackendError> {
        let key = PipelineKey {
            shader: shader.id,
            lut_count,
        };
        if !self.pipelines.contains_key(&key) {
            let cached = self.build_pipeline(shader, lut_count)?;
            self.pipelines.insert(key, cached);
        }
        Ok(key)
    }

    fn build_pipeline(
        &self,
        shader: &WgpuShader,
        lut_count: usize,
    ) -> Result<CachedPipeline, BackendError> {
        let group0_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("pass group0 layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        texture_layout_entry(1),
                        sampler_layout_entry(2),
                    ],
                });

        let lut_layout = if lut_count > 0 {
            let mut entries = Vec::with_capacity(lut_count * 2);
            for index in 0..lut_count {
                entries.push(texture_layout_entry((index as u32) * 2));
                entries.push(sampler_layout_entry((index as u32) * 2 + 1));
            }
            Some(
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("pass lut layout"),
                        entries: &entries,
                    }),
            )
        } else {
            None
        };

        let mut group_layouts = vec![&group0_layout];
        if let Some(layout) = lut_layout.as_ref() {
            group_layouts.push(layout);
        }
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pass pipeline layout"),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("pass pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::Draw {
                detail: format!("pipeline creation failed: {error}"),
            });
        }

        Ok(CachedPipeline {
            pipeline,
            group0_layout,
            lut_layout,
        })
    }
}

impl RenderBackend for WgpuBackend {
    type Target = WgpuTarget;
    type Shader = WgpuShader;

    fn create_target(
        &mut self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<Self::Target, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::TargetCreation {
                width,
                height,
                detail: "zero-sized target".to_string(),
            });
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(BackendError::TargetCreation {
                width,
                height,
                detail: format!("exceeds device texture limit of {max}"),
            });
        }
        Ok(self.make_target(width, height))
    }

    fn create_shader(&mut self, reference: Option<&Path>) -> Result<Self::Shader, BackendError> {
        let (label, code) = match reference {
            Some(path) => {
                let code = fs::read_to_string(path).map_err(|error| {
                    BackendError::ShaderCreation {
                        reference: path.display().to_string(),
                        detail: error.to_string(),
                    }
                })?;
                (path.display().to_string(), code)
            }
            None => ("stock blit".to_string(), STOCK_SHADER.to_string()),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(code.into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCreation {
                reference: label,
                detail: error.to_string(),
            });
        }

        let id = self.next_shader_id;
        self.next_shader_id += 1;
        Ok(WgpuShader { module, id })
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
        _linear: bool,
    ) -> Result<Self::Target, BackendError> {
        let expected = (width as usize) * (height as usize) * 4;
        if pixels.len() != expected {
            return Err(BackendError::TargetCreation {
                width,
                height,
                detail: format!("expected {expected} RGBA bytes, got {}", pixels.len()),
            });
        }
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some("lookup texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            pixels,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTarget {
            texture,
            view,
            size: Dimensions::new(width, height),
        })
    }

    fn upload_frame(
        &mut self,
        target: &Self::Target,
        frame: &FrameBuffer<'_>,
    ) -> Result<(), BackendError> {
        if frame.width > target.size.width || frame.height > target.size.height {
            return Err(BackendError::Upload {
                detail: format!(
                    "frame {}x{} exceeds source texture {}",
                    frame.width, frame.height, target.size
                ),
            });
        }
        let rgba = frame_to_rgba(frame).map_err(|detail| BackendError::Upload { detail })?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) -> Result<(), BackendError> {
        if call.output.is_none() {
            self.ensure_display(call.output_size);
        }

        let uniforms = PassUniforms {
            source_size: [
                call.input.size.width as f32,
                call.input.size.height as f32,
                call.output_size.width as f32,
                call.output_size.height as f32,
            ],
            params: pack_params(call.params),
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("pass uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let key = self.ensure_pipeline(call.shader, call.luts.len())?;
        let cached = &self.pipelines[&key];

        let group0 = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass group0"),
            layout: &cached.group0_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&call.input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler(call.linear)),
                },
            ],
        });

        let lut_group = match cached.lut_layout.as_ref() {
            Some(layout) => {
                let mut entries = Vec::with_capacity(call.luts.len() * 2);
                for (index, lut) in call.luts.iter().enumerate() {
                    entries.push(wgpu::BindGroupEntry {
                        binding: (index as u32) * 2,
                        resource: wgpu::BindingResource::TextureView(&lut.texture.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: (index as u32) * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(self.sampler(lut.linear)),
                    });
                }
                Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("pass luts"),
                    layout,
                    entries: &entries,
                }))
            }
            None => None,
        };

        let output_view = match call.output {
            Some(target) => &target.view,
            // ensure_display ran above; the display target exists.
            None => match self.display.as_ref() {
                Some(display) => &display.view,
                None => {
                    return Err(BackendError::Draw {
                        detail: "display target unavailable".to_string(),
                    })
                }
            },
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pass encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&cached.pipeline);
            render_pass.set_bind_group(0, &group0, &[]);
            if let Some(group) = lut_group.as_ref() {
                render_pass.set_bind_group(1, group, &[]);
            }
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn texture_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_layout_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn pack_params(params: &[(String, f32)]) -> [[f32; 4]; 4] {
    if params.len() > MAX_PARAMS {
        tracing::warn!(
            declared = params.len(),
            carried = MAX_PARAMS,
            "too many dynamic parameters; extras dropped"
        );
    }
    let mut packed = [[0.0f32; 4]; 4];
    for (index, (_, value)) in params.iter().take(MAX_PARAMS).enumerate() {
        packed[index / 4][index % 4] = *value;
    }
    packed
}

/// Expands an emulated frame into tightly packed RGBA8 rows.
fn frame_to_rgba(frame: &FrameBuffer<'_>) -> Result<Vec<u8>, String> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let bytes_per_pixel = match frame.format {
        PixelFormat::Rgb565 => 2,
        PixelFormat::Xrgb8888 => 4,
    };
    let row_bytes = width * bytes_per_pixel;
    if frame.pitch < row_bytes {
        return Err(format!(
            "pitch {} is smaller than a {row_bytes}-byte row",
            frame.pitch
        ));
    }
    if frame.data.len() < frame.pitch * height.saturating_sub(1) + row_bytes {
        return Err(format!(
            "frame buffer of {} bytes is too small for {width}x{height} at pitch {}",
            frame.data.len(),
            frame.pitch
        ));
    }

    let mut rgba = Vec::with_capacity(width * height * 4);
    for row in 0..height {
        let line = &frame.data[row * frame.pitch..row * frame.pitch + row_bytes];
        match frame.format {
            PixelFormat::Rgb565 => {
                for pixel in line.chunks_exact(2) {
                    let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                    let r = ((value >> 11) & 0x1f) as u8;
                    let g = ((value >> 5) & 0x3f) as u8;
                    let b = (value & 0x1f) as u8;
                    rgba.extend([
                        (r << 3) | (r >> 2),
                        (g << 2) | (g >> 4),
                        (b << 3) | (b >> 2),
                        0xff,
                    ]);
                }
            }
            PixelFormat::Xrgb8888 => {
                for pixel in line.chunks_exact(4) {
                    rgba.extend([pixel[2], pixel[1], pixel[0], 0xff]);
                }
            }
        }
    }
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb565_rows_expand_with_replicated_low_bits() {
        // One red, one green, one blue pixel.
        let red: u16 = 0xf800;
        let green: u16 = 0x07e0;
        let blue: u16 = 0x001f;
        let mut data = Vec::new();
        for value in [red, green, blue] {
            data.extend(value.to_le_bytes());
        }

        let frame = FrameBuffer {
            data: &data,
            width: 3,
            height: 1,
            pitch: 6,
            format: PixelFormat::Rgb565,
        };
        let rgba = frame_to_rgba(&frame).unwrap();
        assert_eq!(
            rgba,
            vec![255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255]
        );
    }

    #[test]
    fn xrgb_rows_swizzle_and_skip_padding() {
        // Two rows with 4 bytes of padding each; pixel bytes are B,G,R,X.
        let mut data = Vec::new();
        data.extend([0x10, 0x20, 0x30, 0x00]);
        data.extend([0xaa, 0xbb, 0xcc, 0xdd]); // row padding
        data.extend([0x40, 0x50, 0x60, 0x00]);
        data.extend([0xee, 0xff, 0x00, 0x11]);

        let frame = FrameBuffer {
            data: &data,
            width: 1,
            height: 2,
            pitch: 8,
            format: PixelFormat::Xrgb8888,
        };
        let rgba = frame_to_rgba(&frame).unwrap();
        assert_eq!(rgba, vec![0x30, 0x20, 0x10, 0xff, 0x60, 0x50, 0x40, 0xff]);
    }

    #[test]
    fn undersized_buffers_are_rejected() {
        let data = [0u8; 4];
        let frame = FrameBuffer {
            data: &data,
            width: 4,
            height: 2,
            pitch: 8,
            format: PixelFormat::Rgb565,
        };
        assert!(frame_to_rgba(&frame).is_err());
    }

    #[test]
    fn params_pack_into_vec4_rows() {
        let params: Vec<(String, f32)> = (0..6)
            .map(|index| (format!("p{index}"), index as f32))
            .collect();
        let packed = pack_params(&params);
        assert_eq!(packed[0], [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(packed[1], [4.0, 5.0, 0.0, 0.0]);
    }
}
