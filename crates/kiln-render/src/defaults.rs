//! Baseline resources a renderer starts from.
//!
//! Owned and passed in by the caller; nothing here is a process-wide
//! singleton. Two renderers built from two `RenderDefaults` share nothing.

use crate::batch::BatchVertex;
use crate::effect::{Effect, EffectDescriptor, EffectLayout};
use crate::instances::InstanceBuffer;
use crate::mesh::MeshVertex;
use crate::texture::Texture2d;
use kiln_gpu::{
    BlendMode, DepthStencilMode, Device, GpuSampler, RasterMode, ResourceKind,
    ResourceLayoutEntry, SamplerKey, ShaderStages,
};
use std::sync::Arc;

const SPRITE_WGSL: &str = r#"
struct Camera {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(1) @binding(0) var base_texture: texture_2d<f32>;
@group(1) @binding(1) var base_sampler: sampler;

struct VertexIn {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct InstanceIn {
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
}

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.position = camera.projection * camera.view * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    return out;
}

@vertex
fn vs_instanced(in: VertexIn, inst: InstanceIn) -> VertexOut {
    let model = mat4x4<f32>(inst.model_0, inst.model_1, inst.model_2, inst.model_3);
    var out: VertexOut;
    out.position = camera.projection * camera.view * model * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(base_texture, base_sampler, in.uv) * in.color;
}
"#;

const MESH_WGSL: &str = r#"
struct Camera {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(1) @binding(0) var base_texture: texture_2d<f32>;
@group(1) @binding(1) var base_sampler: sampler;

struct VertexIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct InstanceIn {
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
}

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

@vertex
fn vs_main(in: VertexIn, inst: InstanceIn) -> VertexOut {
    let model = mat4x4<f32>(inst.model_0, inst.model_1, inst.model_2, inst.model_3);
    var out: VertexOut;
    out.position = camera.projection * camera.view * model * vec4<f32>(in.position, 1.0);
    out.normal = (model * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let light = normalize(vec3<f32>(0.4, 0.8, 0.6));
    let diffuse = max(dot(normalize(in.normal), light), 0.0) * 0.8 + 0.2;
    return textureSample(base_texture, base_sampler, in.uv) * vec4<f32>(vec3<f32>(diffuse), 1.0);
}
"#;

fn camera_layout() -> EffectLayout {
    EffectLayout {
        name: "camera",
        entries: vec![ResourceLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX,
            kind: ResourceKind::UniformBuffer,
        }],
    }
}

fn material_layout() -> EffectLayout {
    EffectLayout {
        name: "material",
        entries: vec![
            ResourceLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                kind: ResourceKind::Texture,
            },
            ResourceLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                kind: ResourceKind::Sampler,
            },
        ],
    }
}

/// The resources a freshly-constructed renderer needs before the caller
/// provides anything of its own: a white stand-in texture, a linear sampler
/// and the built-in sprite and mesh effects.
pub struct RenderDefaults {
    pub white: Arc<Texture2d>,
    pub sampler: GpuSampler,
    pub sprite_effect: Arc<Effect>,
    pub mesh_effect: Arc<Effect>,
    /// Baseline pipeline state a batch session opens with.
    pub blend: BlendMode,
    pub depth_stencil: DepthStencilMode,
    pub raster: RasterMode,
}

impl RenderDefaults {
    pub fn new(device: &dyn Device) -> Self {
        let sprite_effect = Effect::new(
            device,
            EffectDescriptor {
                label: "sprite",
                wgsl: SPRITE_WGSL,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                instanced_vertex_entry: Some("vs_instanced"),
                vertex_buffers: vec![BatchVertex::layout()],
                instance_buffers: vec![InstanceBuffer::layout()],
                layouts: vec![camera_layout(), material_layout()],
                topology: wgpu::PrimitiveTopology::TriangleList,
            },
        );
        let mesh_effect = Effect::new(
            device,
            EffectDescriptor {
                label: "mesh",
                wgsl: MESH_WGSL,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                instanced_vertex_entry: Some("vs_main"),
                vertex_buffers: vec![MeshVertex::layout()],
                instance_buffers: vec![InstanceBuffer::layout()],
                layouts: vec![camera_layout(), material_layout()],
                topology: wgpu::PrimitiveTopology::TriangleList,
            },
        );
        Self {
            white: Arc::new(Texture2d::white(device)),
            sampler: device.create_sampler(&SamplerKey::linear()),
            sprite_effect: Arc::new(sprite_effect),
            mesh_effect: Arc::new(mesh_effect),
            blend: BlendMode::default(),
            depth_stencil: DepthStencilMode::disabled(),
            raster: RasterMode::cull_none(),
        }
    }
}
