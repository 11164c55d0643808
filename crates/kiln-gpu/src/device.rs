//! Traits abstracting GPU resource creation and command recording.
//!
//! [`Device`] does not use lifetimes in its return types: everything it
//! hands out is an owned handle, which keeps the trait object-safe and lets
//! the render layer share one device behind an `Arc<dyn Device>`. A mock
//! implementation records calls through interior mutability.
//!
//! Resource creation is infallible at this level: the backends treat
//! device-level exhaustion as fatal, since there is no degraded rendering
//! mode to fall back to.

use crate::handle::*;
use crate::state::{BlendMode, DepthStencilMode, RasterMode, SamplerKey, VertexBufferLayout};
use kiln_core::geometry::Rect;
use std::ops::Range;

bitflags::bitflags! {
    /// How a buffer may be used once created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const UNIFORM  = 1 << 2;
        const COPY_DST = 1 << 3;
    }
}

bitflags::bitflags! {
    /// How a texture may be used once created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const TEXTURE_BINDING = 1 << 0;
        const RENDER_TARGET   = 1 << 1;
        const COPY_DST        = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: BufferUsages,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: TextureUsages,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Option<&'a str>,
    pub wgsl: &'a str,
}

/// The kind of resource a layout slot expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    Texture,
    Sampler,
}

/// One declared slot in a resource layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceLayoutDescriptor<'a> {
    pub label: Option<&'a str>,
    pub entries: &'a [ResourceLayoutEntry],
}

/// A concrete resource bound into a set.
#[derive(Debug, Clone, Copy)]
pub enum BindingResource<'a> {
    Buffer(&'a GpuBuffer),
    Texture(&'a GpuTexture),
    Sampler(&'a GpuSampler),
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceBinding<'a> {
    pub binding: u32,
    pub resource: BindingResource<'a>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSetDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: &'a GpuResourceLayout,
    pub bindings: &'a [ResourceBinding<'a>],
}

/// The aggregate pipeline description.
///
/// Everything that determines a compiled pipeline object lives here; the
/// render layer hashes a condensed form of it to memoize compilation.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub shader: &'a GpuShaderModule,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_buffers: &'a [VertexBufferLayout],
    pub layouts: &'a [&'a GpuResourceLayout],
    pub target_format: wgpu::TextureFormat,
    pub blend: BlendMode,
    pub depth_stencil: DepthStencilMode,
    pub raster: RasterMode,
    pub topology: wgpu::PrimitiveTopology,
}

/// Trait abstracting GPU resource creation and uploads.
///
/// Methods take `&self` and return owned handles, so one device can be
/// shared behind an `Arc` and mocks can record through interior mutability.
pub trait Device: Send + Sync {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer;

    /// Write data into a buffer.
    ///
    /// Synchronous from the caller's viewpoint; the real backend stages the
    /// write on the queue for submission with the current frame.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]);

    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture;

    /// Upload tightly-packed pixel data covering the whole texture.
    fn write_texture(&self, texture: &GpuTexture, data: &[u8]);

    fn create_sampler(&self, key: &SamplerKey) -> GpuSampler;

    fn create_shader_module(&self, desc: &ShaderModuleDescriptor) -> GpuShaderModule;

    fn create_resource_layout(&self, desc: &ResourceLayoutDescriptor) -> GpuResourceLayout;

    fn create_resource_set(&self, desc: &ResourceSetDescriptor) -> GpuResourceSet;

    fn create_render_pipeline(&self, desc: &RenderPipelineDescriptor) -> GpuPipeline;
}

/// Command recording for one render pass.
///
/// Single-threaded and strictly ordered: commands are executed in call
/// order, and a draw issued through this trait cannot be aborted.
pub trait RenderPass {
    fn set_pipeline(&mut self, pipeline: &GpuPipeline);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer);

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, format: wgpu::IndexFormat);

    fn set_resource_set(&mut self, slot: u32, set: &GpuResourceSet);

    fn set_scissor_rect(&mut self, rect: Rect<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
}
