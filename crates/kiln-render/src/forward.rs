//! Depth-sorted forward mesh pass.
//!
//! Renderables queue up over the frame, split by material translucency.
//! At draw time opaques go front-to-back (early-z friendly) and translucents
//! back-to-front (correct blending), both by squared camera distance of the
//! first instance transform. Every renderable draws instanced; the frame's
//! transforms are merged into one instance upload and each draw addresses
//! its own instance range.

use crate::camera::Camera;
use crate::defaults::RenderDefaults;
use crate::effect::PipelineKey;
use crate::instances::InstanceBuffer;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::resource_cache::{ResourceSetCache, ResourceSetKey};
use crate::target::RenderTarget;
use glam::{Mat4, Vec3};
use kiln_gpu::{
    BindingResource, BufferDescriptor, BufferUsages, Device, GpuBuffer, RenderPass,
    ResourceBinding, ResourceSetDescriptor,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Upper bound on skeleton matrices per renderable.
pub const MAX_BONES: usize = 96;

/// Rest pose bound when a skinned effect draws an unskinned renderable.
const IDENTITY_PALETTE: [Mat4; MAX_BONES] = [Mat4::IDENTITY; MAX_BONES];

/// One queued mesh draw.
pub struct Renderable {
    pub mesh: Arc<Mesh>,
    /// World transforms, one per instance. Must not be empty.
    pub transforms: Vec<Mat4>,
    pub material: Arc<Material>,
    /// Skeleton palette, bound when the material's effect declares a
    /// `bones` layout.
    pub bones: Option<Vec<Mat4>>,
}

impl Renderable {
    pub fn new(mesh: Arc<Mesh>, material: Arc<Material>, transform: Mat4) -> Self {
        Self {
            mesh,
            transforms: vec![transform],
            material,
            bones: None,
        }
    }

    pub fn instanced(mesh: Arc<Mesh>, material: Arc<Material>, transforms: Vec<Mat4>) -> Self {
        Self {
            mesh,
            transforms,
            material,
            bones: None,
        }
    }

    pub fn with_bones(mut self, bones: Vec<Mat4>) -> Self {
        self.bones = Some(bones);
        self
    }

    fn anchor(&self) -> Vec3 {
        self.transforms[0].w_axis.truncate()
    }
}

/// The forward pass over queued renderables.
pub struct ForwardRenderer {
    device: Arc<dyn Device>,
    defaults: Arc<RenderDefaults>,
    camera: Option<Camera>,
    opaque: Vec<Renderable>,
    translucent: Vec<Renderable>,
    instances: InstanceBuffer,
    camera_buffer: GpuBuffer,
    /// One palette buffer per skinned draw in a pass, reused across frames.
    /// Draws cannot share one: queued writes all land before the pass runs.
    bones_buffers: Vec<GpuBuffer>,
    bones_cursor: usize,
    sets: ResourceSetCache,
    draw_calls: u32,
}

impl ForwardRenderer {
    pub fn new(device: Arc<dyn Device>, defaults: Arc<RenderDefaults>) -> Self {
        let camera_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("forward camera"),
            size: std::mem::size_of::<crate::camera::CameraUniform>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let instances = InstanceBuffer::new(&*device, "forward instances", 64);
        Self {
            device,
            defaults,
            camera: None,
            opaque: Vec::new(),
            translucent: Vec::new(),
            instances,
            camera_buffer,
            bones_buffers: Vec::new(),
            bones_cursor: 0,
            sets: ResourceSetCache::new(),
            draw_calls: 0,
        }
    }

    /// The camera the next `draw` renders through.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    pub fn clear_camera(&mut self) {
        self.camera = None;
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.camera.as_mut()
    }

    /// Queue a renderable for the next `draw`. Renderables without a single
    /// transform are dropped.
    pub fn add(&mut self, renderable: Renderable) {
        if renderable.transforms.is_empty() {
            debug!("dropping renderable with no transforms");
            return;
        }
        if renderable.material.translucent {
            self.translucent.push(renderable);
        } else {
            self.opaque.push(renderable);
        }
    }

    /// Queued renderables as `(opaque, translucent)` counts.
    pub fn queued(&self) -> (usize, usize) {
        (self.opaque.len(), self.translucent.len())
    }

    /// Draw calls issued by the last `draw`.
    pub fn draw_call_count(&self) -> u32 {
        self.draw_calls
    }

    /// Render everything queued into `pass`.
    ///
    /// Without a camera this is a silent no-op and the queues are retained,
    /// so setting a camera later still draws what accumulated. After a
    /// successful pass both queues are cleared unconditionally.
    pub fn draw(&mut self, pass: &mut dyn RenderPass, target: &RenderTarget) {
        let Some(camera) = self.camera.clone() else {
            trace!("forward draw with no active camera");
            return;
        };
        self.draw_calls = 0;
        self.bones_cursor = 0;

        let eye = camera.position();
        let distance = |r: &Renderable| r.anchor().distance_squared(eye);
        self.opaque
            .sort_by(|a, b| distance(a).total_cmp(&distance(b)));
        self.translucent
            .sort_by(|a, b| distance(b).total_cmp(&distance(a)));

        let opaque = std::mem::take(&mut self.opaque);
        let translucent = std::mem::take(&mut self.translucent);

        let device = &*self.device;
        device.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera.uniform()));

        // One merged instance upload for the whole pass; each draw indexes
        // its own range.
        let frame_transforms: Vec<Mat4> = opaque
            .iter()
            .chain(&translucent)
            .flat_map(|r| r.transforms.iter().copied())
            .collect();
        self.instances.upload(device, &frame_transforms);

        let mut first_instance = 0u32;
        for renderable in opaque.iter().chain(&translucent) {
            let count = renderable.transforms.len() as u32;
            self.draw_one(pass, target, renderable, first_instance..first_instance + count);
            first_instance += count;
        }
        trace!(draw_calls = self.draw_calls, "forward pass finished");
    }

    fn draw_one(
        &mut self,
        pass: &mut dyn RenderPass,
        target: &RenderTarget,
        renderable: &Renderable,
        instances: std::ops::Range<u32>,
    ) {
        let device = &*self.device;
        let material = &renderable.material;
        let effect = &material.effect;

        let pipeline = effect.pipeline(
            device,
            PipelineKey {
                blend: material.blend,
                depth_stencil: material.depth_stencil,
                raster: material.raster,
                target_format: target.format(),
                instanced: true,
            },
        );
        pass.set_pipeline(&pipeline);

        let camera_layout = effect
            .layout("camera")
            .expect("mesh effect lacks a camera layout");
        let camera_buffer = &self.camera_buffer;
        let camera_set = self
            .sets
            .get_or_create(ResourceSetKey::Layout(camera_layout.id()), || {
                device.create_resource_set(&ResourceSetDescriptor {
                    label: Some("forward camera"),
                    layout: camera_layout,
                    bindings: &[ResourceBinding {
                        binding: 0,
                        resource: BindingResource::Buffer(camera_buffer),
                    }],
                })
            });
        pass.set_resource_set(effect.slot("camera").unwrap_or(0), &camera_set);

        let material_layout = effect
            .layout("material")
            .expect("mesh effect lacks a material layout");
        let texture = material
            .base_texture
            .as_deref()
            .unwrap_or(&*self.defaults.white);
        let material_set = texture.resource_set(device, &self.defaults.sampler, material_layout);
        pass.set_resource_set(effect.slot("material").unwrap_or(1), &material_set);

        if let Some(bones_layout) = effect.layout("bones") {
            let bones_buffer = match self.bones_buffers.get(self.bones_cursor) {
                Some(buffer) => buffer.clone(),
                None => {
                    let buffer = device.create_buffer(&BufferDescriptor {
                        label: Some("forward bones"),
                        size: (MAX_BONES * std::mem::size_of::<Mat4>()) as u64,
                        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                    });
                    self.bones_buffers.push(buffer.clone());
                    buffer
                }
            };
            self.bones_cursor += 1;
            match &renderable.bones {
                Some(bones) => {
                    if bones.len() > MAX_BONES {
                        debug!(
                            bones = bones.len(),
                            max = MAX_BONES,
                            "truncating bone palette"
                        );
                    }
                    let palette = &bones[..bones.len().min(MAX_BONES)];
                    device.write_buffer(&bones_buffer, 0, bytemuck::cast_slice(palette));
                }
                // Rest pose for unskinned renderables under a skinned effect.
                None => {
                    device.write_buffer(
                        &bones_buffer,
                        0,
                        bytemuck::cast_slice(&IDENTITY_PALETTE),
                    );
                }
            }
            let bones_set = self.sets.get_or_create(
                ResourceSetKey::BufferLayout(bones_buffer.id(), bones_layout.id()),
                || {
                    device.create_resource_set(&ResourceSetDescriptor {
                        label: Some("forward bones"),
                        layout: bones_layout,
                        bindings: &[ResourceBinding {
                            binding: 0,
                            resource: BindingResource::Buffer(&bones_buffer),
                        }],
                    })
                },
            );
            pass.set_resource_set(effect.slot("bones").unwrap_or(2), &bones_set);
        }

        pass.set_vertex_buffer(0, renderable.mesh.vertex_buffer());
        pass.set_vertex_buffer(1, self.instances.buffer());
        pass.set_index_buffer(renderable.mesh.index_buffer(), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..renderable.mesh.index_count(), 0, instances);
        self.draw_calls += 1;
    }
}
