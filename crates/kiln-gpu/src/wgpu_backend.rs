//! Real [`Device`]/[`RenderPass`] implementations over wgpu.
//!
//! The caller owns instance/adapter/surface bring-up and pass creation; this
//! module only lowers kiln descriptors into wgpu ones and forwards commands.

use crate::device::*;
use crate::handle::*;
use crate::state::SamplerKey;
use kiln_core::geometry::Rect;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Depth format used whenever a pipeline enables depth testing.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A [`Device`] backed by a wgpu device/queue pair.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: AtomicU64,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn fresh_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

fn map_buffer_usage(usage: BufferUsages) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsages::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsages::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsages::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsages::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn map_texture_usage(usage: TextureUsages) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsages::TEXTURE_BINDING) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsages::RENDER_TARGET) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsages::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    out
}

fn map_visibility(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::empty();
    if stages.contains(ShaderStages::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    out
}

impl Device for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer {
        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label,
            size: desc.size,
            usage: map_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        GpuBuffer::from_wgpu(self.fresh_id(), desc.size, raw)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer.as_wgpu(), offset, data);
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture {
        let raw = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label,
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: map_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = raw.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture::from_wgpu(self.fresh_id(), desc.width, desc.height, desc.format, raw, view)
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8]) {
        let bytes_per_pixel = texture.format().block_copy_size(None).unwrap_or(4);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.as_wgpu(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(texture.width() * bytes_per_pixel),
                rows_per_image: Some(texture.height()),
            },
            wgpu::Extent3d {
                width: texture.width(),
                height: texture.height(),
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_sampler(&self, key: &SamplerKey) -> GpuSampler {
        let raw = self
            .device
            .create_sampler(&key.to_descriptor(Some("kiln sampler")));
        GpuSampler::from_wgpu(self.fresh_id(), raw)
    }

    fn create_shader_module(&self, desc: &ShaderModuleDescriptor) -> GpuShaderModule {
        let raw = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label,
                source: wgpu::ShaderSource::Wgsl(desc.wgsl.into()),
            });
        GpuShaderModule::from_wgpu(self.fresh_id(), raw)
    }

    fn create_resource_layout(&self, desc: &ResourceLayoutDescriptor) -> GpuResourceLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .entries
            .iter()
            .map(|e| wgpu::BindGroupLayoutEntry {
                binding: e.binding,
                visibility: map_visibility(e.visibility),
                ty: match e.kind {
                    ResourceKind::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    ResourceKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    ResourceKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                },
                count: None,
            })
            .collect();

        let raw = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: desc.label,
                entries: &entries,
            });
        GpuResourceLayout::from_wgpu(self.fresh_id(), raw)
    }

    fn create_resource_set(&self, desc: &ResourceSetDescriptor) -> GpuResourceSet {
        let entries: Vec<wgpu::BindGroupEntry> = desc
            .bindings
            .iter()
            .map(|b| wgpu::BindGroupEntry {
                binding: b.binding,
                resource: match b.resource {
                    BindingResource::Buffer(buffer) => buffer.as_wgpu().as_entire_binding(),
                    BindingResource::Texture(texture) => {
                        wgpu::BindingResource::TextureView(texture.wgpu_view())
                    }
                    BindingResource::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(sampler.as_wgpu())
                    }
                },
            })
            .collect();

        let raw = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: desc.label,
            layout: desc.layout.as_wgpu(),
            entries: &entries,
        });
        GpuResourceSet::from_wgpu(self.fresh_id(), raw)
    }

    fn create_render_pipeline(&self, desc: &RenderPipelineDescriptor) -> GpuPipeline {
        let layouts: Vec<&wgpu::BindGroupLayout> =
            desc.layouts.iter().map(|l| l.as_wgpu()).collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let attribute_lists: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_buffers
            .iter()
            .map(|vb| {
                vb.attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: a.format,
                        offset: a.offset,
                        shader_location: a.shader_location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_buffers
            .iter()
            .zip(&attribute_lists)
            .map(|(vb, attrs)| wgpu::VertexBufferLayout {
                array_stride: vb.stride,
                step_mode: vb.step_mode,
                attributes: attrs,
            })
            .collect();

        let raw = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label,
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: desc.shader.as_wgpu(),
                    entry_point: Some(desc.vertex_entry),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: desc.shader.as_wgpu(),
                    entry_point: Some(desc.fragment_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.target_format,
                        blend: desc.blend.to_blend_state(),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: desc.topology,
                    cull_mode: desc.raster.cull,
                    front_face: desc.raster.front_face,
                    ..Default::default()
                },
                depth_stencil: desc.depth_stencil.to_depth_stencil_state(DEPTH_FORMAT),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        GpuPipeline::from_wgpu(self.fresh_id(), raw)
    }
}

/// A [`RenderPass`] forwarding into a live wgpu pass.
pub struct WgpuPass {
    pass: wgpu::RenderPass<'static>,
}

impl WgpuPass {
    /// Wrap a wgpu render pass.
    ///
    /// `forget_lifetime` unties the pass from its encoder borrow; the caller
    /// must still finish and submit the encoder after the pass is dropped.
    pub fn new(pass: wgpu::RenderPass<'_>) -> Self {
        Self {
            pass: pass.forget_lifetime(),
        }
    }
}

impl RenderPass for WgpuPass {
    fn set_pipeline(&mut self, pipeline: &GpuPipeline) {
        self.pass.set_pipeline(pipeline.as_wgpu());
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer) {
        self.pass.set_vertex_buffer(slot, buffer.as_wgpu().slice(..));
    }

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: wgpu::IndexFormat) {
        self.pass.set_index_buffer(buffer.as_wgpu().slice(..), format);
    }

    fn set_resource_set(&mut self, slot: u32, set: &GpuResourceSet) {
        self.pass.set_bind_group(slot, set.as_wgpu(), &[]);
    }

    fn set_scissor_rect(&mut self, rect: Rect<u32>) {
        self.pass
            .set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.pass.draw_indexed(indices, base_vertex, instances);
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.pass.draw(vertices, instances);
    }
}
