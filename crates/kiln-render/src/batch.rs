//! Quad-oriented geometry batching.
//!
//! Every primitive occupies one geometry slot of four vertices; six template
//! indices per slot (two triangles) are generated once at construction and
//! never rewritten. Lines are thin rotated quads and triangles duplicate
//! their last vertex, so the one index template serves everything.
//!
//! Geometry accumulates in CPU staging until something forces a flush: a
//! render-state divergence, a texture change, a full staging buffer, or the
//! end of the session. The flush draws under the state the pending geometry
//! was recorded under; only then is the newly requested state adopted.

use crate::color::Color;
use crate::defaults::RenderDefaults;
use crate::effect::{Effect, PipelineKey};
use crate::error::ProtocolError;
use crate::instances::InstanceBuffer;
use crate::state::RenderState;
use crate::target::RenderTarget;
use crate::texture::Texture2d;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use kiln_core::geometry::Rect;
use kiln_gpu::{
    BindingResource, BlendMode, BufferDescriptor, BufferUsages, DepthStencilMode, Device,
    GpuBuffer, GpuResourceSet, GpuSampler, HandleId, RasterMode, RenderPass, ResourceBinding,
    ResourceSetDescriptor, VertexAttribute, VertexBufferLayout,
};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::camera::CameraUniform;

bitflags::bitflags! {
    /// Optional features a batch can be built with.
    ///
    /// Capabilities replace dedicated batch variants: one implementation,
    /// with feature-specific calls rejected when the flag is absent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BatchCapabilities: u32 {
        /// Allow per-draw sampler overrides through the state stack.
        const SAMPLER_OVERRIDES = 1 << 0;
        /// Allow a per-draw depth layer on textured quads.
        const LAYER_DEPTH = 1 << 1;
        /// Allow instanced quad draws with per-instance transforms.
        const INSTANCING = 1 << 2;
    }
}

/// One batched vertex: position, texture coordinates, tint.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<BatchVertex>(), 36);

impl BatchVertex {
    /// Vertex buffer layout at shader locations 0..=2.
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            stride: std::mem::size_of::<Self>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0,
                },
                VertexAttribute {
                    format: wgpu::VertexFormat::Float32x2,
                    offset: 12,
                    shader_location: 1,
                },
                VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: 20,
                    shader_location: 2,
                },
            ],
        }
    }
}

const VERTICES_PER_SLOT: u32 = 4;
const INDICES_PER_SLOT: u32 = 6;
const SLOT_BYTES: u64 = VERTICES_PER_SLOT as u64 * std::mem::size_of::<BatchVertex>() as u64;
const CAMERA_BYTES: usize = std::mem::size_of::<CameraUniform>();

/// One camera uniform value under one layout. Each distinct value gets its
/// own buffer, written exactly once at creation: queued buffer writes all
/// complete before the pass executes, so rewriting a shared uniform between
/// flushes would retroactively change earlier draws in the same pass.
type CameraKey = (HandleId, [u8; CAMERA_BYTES]);

/// Largest slot capacity addressable with `u16` indices.
pub const MAX_CAPACITY: u32 = 16384;

/// Construction parameters for a [`SpriteBatch`].
pub struct SpriteBatchDescriptor {
    /// Geometry slots per flush, clamped to `1..=MAX_CAPACITY`.
    pub capacity: u32,
    pub capabilities: BatchCapabilities,
}

impl Default for SpriteBatchDescriptor {
    fn default() -> Self {
        Self {
            capacity: 2048,
            capabilities: BatchCapabilities::empty(),
        }
    }
}

struct Session {
    pass: Box<dyn RenderPass>,
    state: RenderState,
    texture: Option<Arc<Texture2d>>,
}

/// The quad batcher.
///
/// All geometry, state and query calls require an open session; `begin`
/// hands the batch a render pass and `end` returns it.
pub struct SpriteBatch {
    device: Arc<dyn Device>,
    defaults: Arc<RenderDefaults>,
    capabilities: BatchCapabilities,
    capacity: u32,
    vertices: Vec<BatchVertex>,
    cursor: u32,
    vertex_buffer: GpuBuffer,
    /// Slots the GPU vertex buffer can hold; grows past `capacity` when one
    /// session flushes more geometry than fits.
    vertex_slots: u32,
    /// Slots already flushed this session. Each flush uploads behind the
    /// previous one so no draw in the pass reads another flush's bytes.
    flushed_slots: u32,
    index_buffer: GpuBuffer,
    camera_sets: ahash::HashMap<CameraKey, (GpuBuffer, GpuResourceSet)>,
    instances: Option<InstanceBuffer>,
    instance_cursor: u32,
    session: Option<Session>,
    draw_calls: u32,
}

impl SpriteBatch {
    pub fn new(
        device: Arc<dyn Device>,
        defaults: Arc<RenderDefaults>,
        desc: SpriteBatchDescriptor,
    ) -> Self {
        let capacity = desc.capacity.clamp(1, MAX_CAPACITY);

        let vertex_buffer = Self::allocate_vertices(&*device, capacity);

        // The index template never changes: slot i always uses vertices
        // 4i..4i+3 with the same winding, so it is uploaded exactly once.
        let index_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("batch indices"),
            size: (capacity * INDICES_PER_SLOT) as u64 * std::mem::size_of::<u16>() as u64,
            usage: BufferUsages::INDEX | BufferUsages::COPY_DST,
        });
        let template = quad_index_template(capacity);
        device.write_buffer(&index_buffer, 0, bytemuck::cast_slice(&template));

        let instances = desc
            .capabilities
            .contains(BatchCapabilities::INSTANCING)
            .then(|| InstanceBuffer::new(&*device, "batch instances", 16));

        Self {
            device,
            defaults,
            capabilities: desc.capabilities,
            capacity,
            vertices: vec![BatchVertex::zeroed(); (capacity * VERTICES_PER_SLOT) as usize],
            cursor: 0,
            vertex_buffer,
            vertex_slots: capacity,
            flushed_slots: 0,
            index_buffer,
            camera_sets: ahash::HashMap::default(),
            instances,
            instance_cursor: 0,
            session: None,
            draw_calls: 0,
        }
    }

    fn allocate_vertices(device: &dyn Device, slots: u32) -> GpuBuffer {
        device.create_buffer(&BufferDescriptor {
            label: Some("batch vertices"),
            size: slots as u64 * SLOT_BYTES,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn capabilities(&self) -> BatchCapabilities {
        self.capabilities
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Slots staged since the last flush.
    pub fn pending(&self) -> u32 {
        self.cursor
    }

    /// Draw calls issued since the last `begin`. Stable after `end`, for
    /// diagnostics.
    pub fn draw_call_count(&self) -> u32 {
        self.draw_calls
    }

    /// Open a session on `pass`, rendering into `target`.
    ///
    /// State starts from the caller's defaults with a pixel-space projection
    /// covering the target (origin top-left, y down); nothing carries over
    /// from the previous session.
    pub fn begin(
        &mut self,
        pass: Box<dyn RenderPass>,
        target: Arc<RenderTarget>,
    ) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::SessionAlreadyOpen);
        }
        let size = target.viewport().size();
        let projection = Mat4::orthographic_rh(
            0.0,
            size.width as f32,
            size.height as f32,
            0.0,
            -1.0,
            1.0,
        );
        let state = RenderState::new(target, projection, &self.defaults);
        self.session = Some(Session {
            pass,
            state,
            texture: None,
        });
        self.cursor = 0;
        self.flushed_slots = 0;
        self.instance_cursor = 0;
        self.draw_calls = 0;
        trace!("batch session opened");
        Ok(())
    }

    /// Flush whatever is pending, close the session and hand the pass back.
    pub fn end(&mut self) -> Result<Box<dyn RenderPass>, ProtocolError> {
        if self.session.is_none() {
            return Err(ProtocolError::SessionNotOpen);
        }
        self.flush();
        let session = self.session.take().expect("session checked above");
        trace!(draw_calls = self.draw_calls, "batch session closed");
        Ok(session.pass)
    }

    fn require(&self, capability: BatchCapabilities) -> Result<(), ProtocolError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(ProtocolError::MissingCapability(capability))
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session, ProtocolError> {
        self.session.as_mut().ok_or(ProtocolError::SessionNotOpen)
    }

    fn session_ref(&self) -> Result<&Session, ProtocolError> {
        self.session.as_ref().ok_or(ProtocolError::SessionNotOpen)
    }

    // State stack. Pushes take effect on the next geometry call; pops on an
    // empty stack are protocol errors.

    pub fn push_target(&mut self, target: Arc<RenderTarget>) -> Result<(), ProtocolError> {
        self.session_mut()?.state.target.push(target);
        Ok(())
    }

    pub fn pop_target(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.target.pop()
    }

    pub fn push_effect(&mut self, effect: Arc<Effect>) -> Result<(), ProtocolError> {
        self.session_mut()?.state.effect.push(effect);
        Ok(())
    }

    pub fn pop_effect(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.effect.pop()
    }

    pub fn push_blend(&mut self, blend: BlendMode) -> Result<(), ProtocolError> {
        self.session_mut()?.state.blend.push(blend);
        Ok(())
    }

    pub fn pop_blend(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.blend.pop()
    }

    pub fn push_depth_stencil(&mut self, mode: DepthStencilMode) -> Result<(), ProtocolError> {
        self.session_mut()?.state.depth_stencil.push(mode);
        Ok(())
    }

    pub fn pop_depth_stencil(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.depth_stencil.pop()
    }

    pub fn push_raster(&mut self, mode: RasterMode) -> Result<(), ProtocolError> {
        self.session_mut()?.state.raster.push(mode);
        Ok(())
    }

    pub fn pop_raster(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.raster.pop()
    }

    pub fn push_projection(&mut self, projection: Mat4) -> Result<(), ProtocolError> {
        self.session_mut()?.state.projection.push(projection);
        Ok(())
    }

    pub fn pop_projection(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.projection.pop()
    }

    pub fn push_view(&mut self, view: Mat4) -> Result<(), ProtocolError> {
        self.session_mut()?.state.view.push(view);
        Ok(())
    }

    pub fn pop_view(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.view.pop()
    }

    pub fn push_sampler(&mut self, sampler: GpuSampler) -> Result<(), ProtocolError> {
        self.require(BatchCapabilities::SAMPLER_OVERRIDES)?;
        self.session_mut()?.state.sampler.push(sampler);
        Ok(())
    }

    pub fn pop_sampler(&mut self) -> Result<(), ProtocolError> {
        self.require(BatchCapabilities::SAMPLER_OVERRIDES)?;
        self.session_mut()?.state.sampler.pop()
    }

    pub fn push_scissor(&mut self, rect: Rect<u32>) -> Result<(), ProtocolError> {
        self.session_mut()?.state.scissor.push(Some(rect));
        Ok(())
    }

    pub fn pop_scissor(&mut self) -> Result<(), ProtocolError> {
        self.session_mut()?.state.scissor.pop()
    }

    // Requested-state queries.

    pub fn blend(&self) -> Result<BlendMode, ProtocolError> {
        Ok(*self.session_ref()?.state.blend.requested())
    }

    pub fn projection(&self) -> Result<Mat4, ProtocolError> {
        Ok(*self.session_ref()?.state.projection.requested())
    }

    pub fn view(&self) -> Result<Mat4, ProtocolError> {
        Ok(*self.session_ref()?.state.view.requested())
    }

    pub fn scissor(&self) -> Result<Option<Rect<u32>>, ProtocolError> {
        Ok(*self.session_ref()?.state.scissor.requested())
    }

    // Geometry.

    /// A textured quad covering `dest`, full texture extent.
    pub fn draw_texture(
        &mut self,
        texture: &Arc<Texture2d>,
        dest: Rect<f32>,
        tint: Color,
    ) -> Result<(), ProtocolError> {
        self.draw_texture_region(texture, dest, Rect::new(0.0, 0.0, 1.0, 1.0), tint)
    }

    /// A textured quad sampling the normalized `uv` sub-rectangle.
    pub fn draw_texture_region(
        &mut self,
        texture: &Arc<Texture2d>,
        dest: Rect<f32>,
        uv: Rect<f32>,
        tint: Color,
    ) -> Result<(), ProtocolError> {
        self.admit(texture)?;
        self.stage_quad(dest, uv, tint, 0.0);
        Ok(())
    }

    /// A textured quad at an explicit depth layer.
    pub fn draw_texture_layered(
        &mut self,
        texture: &Arc<Texture2d>,
        dest: Rect<f32>,
        uv: Rect<f32>,
        tint: Color,
        layer: f32,
    ) -> Result<(), ProtocolError> {
        self.require(BatchCapabilities::LAYER_DEPTH)?;
        self.admit(texture)?;
        self.stage_quad(dest, uv, tint, layer);
        Ok(())
    }

    /// One quad drawn `transforms.len()` times with per-instance transforms,
    /// as a single dedicated draw call.
    pub fn draw_texture_instanced(
        &mut self,
        texture: &Arc<Texture2d>,
        dest: Rect<f32>,
        tint: Color,
        transforms: &[Mat4],
    ) -> Result<(), ProtocolError> {
        self.require(BatchCapabilities::INSTANCING)?;
        if transforms.is_empty() {
            return Ok(());
        }
        self.admit(texture)?;
        // Pending compatible geometry still goes out first; the instanced
        // draw cannot share a slot range with it.
        self.flush();
        self.stage_quad(dest, Rect::new(0.0, 0.0, 1.0, 1.0), tint, 0.0);
        let first = self.instance_cursor;
        let count = transforms.len() as u32;
        let instances = self
            .instances
            .as_mut()
            .expect("instancing capability implies an instance buffer");
        instances.upload_at(&*self.device, first, transforms);
        self.instance_cursor = first + count;
        self.flush_inner(Some(first..first + count));
        Ok(())
    }

    /// A line segment rendered as a thin rotated quad.
    pub fn draw_line(
        &mut self,
        from: Vec2,
        to: Vec2,
        thickness: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        let direction = to - from;
        let length = direction.length();
        if length <= f32::EPSILON {
            return Ok(());
        }
        let normal = Vec2::new(-direction.y, direction.x) / length * (thickness * 0.5);
        self.solid_slot([from + normal, to + normal, to - normal, from - normal], color)
    }

    pub fn fill_rect(&mut self, rect: Rect<f32>, color: Color) -> Result<(), ProtocolError> {
        let white = self.defaults.white.clone();
        self.admit(&white)?;
        self.stage_quad(rect, Rect::new(0.0, 0.0, 1.0, 1.0), color, 0.0);
        Ok(())
    }

    /// Rectangle outline drawn as four thin bars.
    pub fn stroke_rect(
        &mut self,
        rect: Rect<f32>,
        thickness: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        let t = thickness;
        self.fill_rect(Rect::new(rect.x, rect.y, rect.width, t), color)?;
        self.fill_rect(
            Rect::new(rect.x, rect.y + rect.height - t, rect.width, t),
            color,
        )?;
        self.fill_rect(
            Rect::new(rect.x, rect.y + t, t, rect.height - 2.0 * t),
            color,
        )?;
        self.fill_rect(
            Rect::new(
                rect.x + rect.width - t,
                rect.y + t,
                t,
                rect.height - 2.0 * t,
            ),
            color,
        )
    }

    /// A filled triangle: one slot with the last vertex duplicated.
    pub fn fill_triangle(
        &mut self,
        a: Vec2,
        b: Vec2,
        c: Vec2,
        color: Color,
    ) -> Result<(), ProtocolError> {
        self.solid_slot([a, b, c, c], color)
    }

    pub fn fill_circle(
        &mut self,
        center: Vec2,
        radius: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        self.arc_fill(center, radius, radius, 0.0, std::f32::consts::TAU, color)
    }

    pub fn fill_ellipse(
        &mut self,
        center: Vec2,
        radius_x: f32,
        radius_y: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        self.arc_fill(center, radius_x, radius_y, 0.0, std::f32::consts::TAU, color)
    }

    /// A filled pie slice from `start_angle` to `end_angle` (radians).
    pub fn fill_sector(
        &mut self,
        center: Vec2,
        radius: f32,
        start_angle: f32,
        end_angle: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        self.arc_fill(center, radius, radius, start_angle, end_angle, color)
    }

    /// A circle outline one pixel-ish band wide; a thin ring.
    pub fn stroke_circle(
        &mut self,
        center: Vec2,
        radius: f32,
        thickness: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        self.draw_ring(center, radius, thickness, color)
    }

    /// An annulus centered on `radius` with the given band thickness.
    pub fn draw_ring(
        &mut self,
        center: Vec2,
        radius: f32,
        thickness: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        if radius <= 0.0 || thickness <= 0.0 {
            return Ok(());
        }
        let segments = segments_for_radius(radius);
        let outer = radius + thickness * 0.5;
        let inner = (radius - thickness * 0.5).max(0.0);
        let step = std::f32::consts::TAU / segments as f32;
        for i in 0..segments {
            let a0 = step * i as f32;
            let a1 = step * (i + 1) as f32;
            let d0 = Vec2::new(a0.cos(), a0.sin());
            let d1 = Vec2::new(a1.cos(), a1.sin());
            self.solid_slot(
                [
                    center + d0 * outer,
                    center + d1 * outer,
                    center + d1 * inner,
                    center + d0 * inner,
                ],
                color,
            )?;
        }
        Ok(())
    }

    /// Fan-fill an elliptical arc, packing two fan triangles per slot.
    fn arc_fill(
        &mut self,
        center: Vec2,
        radius_x: f32,
        radius_y: f32,
        start_angle: f32,
        end_angle: f32,
        color: Color,
    ) -> Result<(), ProtocolError> {
        let sweep = end_angle - start_angle;
        if sweep.abs() <= f32::EPSILON || radius_x <= 0.0 || radius_y <= 0.0 {
            return Ok(());
        }
        let segments = segments_for_radius(radius_x.max(radius_y));
        let step = sweep / segments as f32;
        let point = |i: u32| {
            let angle = start_angle + step * i as f32;
            center + Vec2::new(angle.cos() * radius_x, angle.sin() * radius_y)
        };
        let mut i = 0;
        while i < segments {
            // Slot triangles are (0,1,2) and (2,3,0); with corners
            // [center, p0, p1, p2] that covers two fan wedges. An odd tail
            // repeats its last point, degenerating the second triangle.
            let last = (i + 2).min(segments);
            self.solid_slot([center, point(i), point(i + 1), point(last)], color)?;
            i += 2;
        }
        Ok(())
    }

    fn solid_slot(&mut self, corners: [Vec2; 4], color: Color) -> Result<(), ProtocolError> {
        let white = self.defaults.white.clone();
        self.admit(&white)?;
        let tint = color.to_array();
        let vertices = corners.map(|corner| BatchVertex {
            position: [corner.x, corner.y, 0.0],
            uv: [0.0, 0.0],
            color: tint,
        });
        self.write_slot(vertices);
        Ok(())
    }

    fn stage_quad(&mut self, dest: Rect<f32>, uv: Rect<f32>, tint: Color, layer: f32) {
        let color = tint.to_array();
        let (x0, y0) = (dest.x, dest.y);
        let (x1, y1) = (dest.x + dest.width, dest.y + dest.height);
        let (u0, v0) = (uv.x, uv.y);
        let (u1, v1) = (uv.x + uv.width, uv.y + uv.height);
        self.write_slot([
            BatchVertex {
                position: [x0, y0, layer],
                uv: [u0, v0],
                color,
            },
            BatchVertex {
                position: [x1, y0, layer],
                uv: [u1, v0],
                color,
            },
            BatchVertex {
                position: [x1, y1, layer],
                uv: [u1, v1],
                color,
            },
            BatchVertex {
                position: [x0, y1, layer],
                uv: [u0, v1],
                color,
            },
        ]);
    }

    fn write_slot(&mut self, vertices: [BatchVertex; 4]) {
        debug_assert!(self.cursor < self.capacity, "admit must flush a full batch");
        let base = (self.cursor * VERTICES_PER_SLOT) as usize;
        self.vertices[base..base + 4].copy_from_slice(&vertices);
        self.cursor += 1;
    }

    /// Gate for every geometry call: flush when the pending geometry cannot
    /// absorb this draw, then adopt the requested state and texture.
    fn admit(&mut self, texture: &Arc<Texture2d>) -> Result<(), ProtocolError> {
        let session = self.session.as_ref().ok_or(ProtocolError::SessionNotOpen)?;
        let texture_changed = session
            .texture
            .as_ref()
            .is_some_and(|bound| bound.texture().id() != texture.texture().id());
        let needs_flush =
            self.cursor >= self.capacity || texture_changed || session.state.any_dirty();
        if needs_flush {
            self.flush();
        }
        let session = self.session.as_mut().expect("session checked above");
        session.state.adopt_all();
        session.texture = Some(texture.clone());
        Ok(())
    }

    /// Draw everything pending under the adopted state, then reset staging.
    /// No-op with nothing pending.
    fn flush(&mut self) {
        self.flush_inner(None);
    }

    fn flush_inner(&mut self, instances: Option<Range<u32>>) {
        if self.cursor == 0 {
            return;
        }
        let device = &*self.device;

        // Each flush sub-allocates its own span of the vertex buffer; the
        // queue completes every write before the pass runs, so spans shared
        // between flushes would corrupt earlier draws.
        let used = (self.cursor * VERTICES_PER_SLOT) as usize;
        let end_slot = self.flushed_slots + self.cursor;
        if end_slot > self.vertex_slots {
            let slots = end_slot.next_power_of_two();
            debug!(old = self.vertex_slots, new = slots, "growing batch vertex buffer");
            self.vertex_buffer = Self::allocate_vertices(device, slots);
            self.vertex_slots = slots;
        }
        let base_vertex = (self.flushed_slots * VERTICES_PER_SLOT) as i32;
        device.write_buffer(
            &self.vertex_buffer,
            self.flushed_slots as u64 * SLOT_BYTES,
            bytemuck::cast_slice(&self.vertices[..used]),
        );

        let session = self.session.as_mut().expect("flush requires a session");
        let state = &session.state;

        let effect = state.effect.current().clone();
        let pipeline = effect.pipeline(
            device,
            PipelineKey {
                blend: *state.blend.current(),
                depth_stencil: *state.depth_stencil.current(),
                raster: *state.raster.current(),
                target_format: state.target.current().format(),
                instanced: instances.is_some(),
            },
        );

        let pass = &mut session.pass;
        pass.set_pipeline(&pipeline);
        pass.set_vertex_buffer(0, &self.vertex_buffer);
        if instances.is_some() {
            let instance_buffer = self
                .instances
                .as_ref()
                .expect("instanced flush requires an instance buffer");
            pass.set_vertex_buffer(1, instance_buffer.buffer());
        }
        pass.set_index_buffer(&self.index_buffer, wgpu::IndexFormat::Uint16);

        let camera_layout = effect
            .layout("camera")
            .expect("batch effect lacks a camera layout");
        let camera = CameraUniform {
            projection: *state.projection.current(),
            view: *state.view.current(),
        };
        let mut camera_bytes = [0u8; CAMERA_BYTES];
        camera_bytes.copy_from_slice(bytemuck::bytes_of(&camera));
        let camera_set = &self
            .camera_sets
            .entry((camera_layout.id(), camera_bytes))
            .or_insert_with(|| {
                debug!("creating batch camera uniform");
                let buffer = device.create_buffer(&BufferDescriptor {
                    label: Some("batch camera"),
                    size: CAMERA_BYTES as u64,
                    usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                });
                device.write_buffer(&buffer, 0, bytemuck::bytes_of(&camera));
                let set = device.create_resource_set(&ResourceSetDescriptor {
                    label: Some("batch camera"),
                    layout: camera_layout,
                    bindings: &[ResourceBinding {
                        binding: 0,
                        resource: BindingResource::Buffer(&buffer),
                    }],
                });
                (buffer, set)
            })
            .1;
        pass.set_resource_set(0, camera_set);

        if let Some(texture) = &session.texture {
            let material_layout = effect
                .layout("material")
                .expect("batch effect lacks a material layout");
            let set = texture.resource_set(device, state.sampler.current(), material_layout);
            pass.set_resource_set(1, &set);
        }

        let mut scissor_applied = false;
        if state.raster.current().scissor_enabled {
            if let Some(rect) = state.scissor.current() {
                pass.set_scissor_rect(*rect);
                scissor_applied = true;
            }
        }

        pass.draw_indexed(
            0..self.cursor * INDICES_PER_SLOT,
            base_vertex,
            instances.unwrap_or(0..1),
        );

        if scissor_applied {
            pass.set_scissor_rect(state.target.current().viewport().full_rect());
        }

        self.vertices[..used].fill(BatchVertex::zeroed());
        self.flushed_slots = end_slot;
        self.cursor = 0;
        self.draw_calls += 1;
        trace!(
            draw_calls = self.draw_calls,
            slots = used / VERTICES_PER_SLOT as usize,
            "flushed batch"
        );
    }
}

/// Curve tessellation density scales with on-screen radius, clamped so tiny
/// circles stay round and huge ones stay bounded.
fn segments_for_radius(radius: f32) -> u32 {
    ((radius * 0.5) as u32).clamp(8, 128)
}

/// Indices for `capacity` quad slots: `[0, 1, 2, 2, 3, 0]` shifted by four
/// per slot.
fn quad_index_template(capacity: u32) -> Vec<u16> {
    let mut indices = Vec::with_capacity((capacity * INDICES_PER_SLOT) as usize);
    for slot in 0..capacity {
        let base = (slot * VERTICES_PER_SLOT) as u16;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::MockDevice;

    fn harness(desc: SpriteBatchDescriptor) -> (Arc<MockDevice>, SpriteBatch, Arc<RenderTarget>) {
        let device = Arc::new(MockDevice::new());
        let defaults = Arc::new(RenderDefaults::new(&*device));
        let batch = SpriteBatch::new(device.clone(), defaults, desc);
        let target = Arc::new(RenderTarget::new(
            &*device,
            "screen",
            640,
            480,
            wgpu::TextureFormat::Rgba8UnormSrgb,
        ));
        (device, batch, target)
    }

    #[test]
    fn index_template_is_uploaded_exactly_once() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        let index_writes = device.writes_to(&batch.index_buffer);
        assert_eq!(index_writes.len(), 1);
        assert_eq!(index_writes[0], 2048 * 6 * 2);

        let pass = device.begin_pass();
        batch.begin(Box::new(pass), target).unwrap();
        for _ in 0..10 {
            batch
                .fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), Color::WHITE)
                .unwrap();
        }
        batch.end().unwrap();

        assert_eq!(device.writes_to(&batch.index_buffer).len(), 1);
    }

    #[test]
    fn template_indices_follow_the_slot_pattern() {
        let template = quad_index_template(3);
        assert_eq!(template[..6], [0, 1, 2, 2, 3, 0]);
        assert_eq!(template[6..12], [4, 5, 6, 6, 7, 4]);
        assert_eq!(template[12..], [8, 9, 10, 10, 11, 8]);
    }

    #[test]
    fn geometry_outside_a_session_is_rejected() {
        let (_, mut batch, _) = harness(SpriteBatchDescriptor::default());
        assert_eq!(
            batch.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Color::WHITE),
            Err(ProtocolError::SessionNotOpen)
        );
        assert_eq!(batch.pop_blend(), Err(ProtocolError::SessionNotOpen));
    }

    #[test]
    fn nested_begin_is_rejected() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        batch
            .begin(Box::new(device.begin_pass()), target.clone())
            .unwrap();
        assert_eq!(
            batch.begin(Box::new(device.begin_pass()), target),
            Err(ProtocolError::SessionAlreadyOpen)
        );
    }

    #[test]
    fn capability_calls_are_rejected_without_the_flag() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        batch.begin(Box::new(device.begin_pass()), target).unwrap();

        let sampler = device.create_sampler(&kiln_gpu::SamplerKey::nearest());
        assert_eq!(
            batch.push_sampler(sampler),
            Err(ProtocolError::MissingCapability(
                BatchCapabilities::SAMPLER_OVERRIDES
            ))
        );
    }

    #[test]
    fn capacity_overflow_flushes_before_admitting() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor {
            capacity: 2,
            capabilities: BatchCapabilities::empty(),
        });
        let pass = device.begin_pass();
        let log = pass.log();
        batch.begin(Box::new(pass), target).unwrap();

        for _ in 0..3 {
            batch
                .fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE)
                .unwrap();
        }
        batch.end().unwrap();

        // Two full slots in the first draw, the overflowing one in the second.
        assert_eq!(log.indexed_draws(), vec![(12, 1), (6, 1)]);
        assert_eq!(batch.draw_call_count(), 2);
    }

    #[test]
    fn split_flushes_sub_allocate_the_vertex_buffer() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor {
            capacity: 8,
            capabilities: BatchCapabilities::empty(),
        });
        let pass = device.begin_pass();
        let log = pass.log();
        batch.begin(Box::new(pass), target).unwrap();

        batch.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.fill_rect(Rect::new(4.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.push_blend(BlendMode::Additive).unwrap();
        batch.fill_rect(Rect::new(8.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.end().unwrap();

        // The second flush lands behind the first and its draw is rebased,
        // so neither draw reads the other's vertices.
        assert_eq!(
            device.write_spans_to(&batch.vertex_buffer),
            vec![(0, 2 * SLOT_BYTES as usize), (2 * SLOT_BYTES, SLOT_BYTES as usize)]
        );
        assert_eq!(log.base_vertices(), vec![0, 8]);
    }

    #[test]
    fn reopened_session_restarts_the_vertex_arena() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        batch
            .begin(Box::new(device.begin_pass()), target.clone())
            .unwrap();
        batch.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.end().unwrap();

        batch.begin(Box::new(device.begin_pass()), target).unwrap();
        batch.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.end().unwrap();

        let spans = device.write_spans_to(&batch.vertex_buffer);
        assert_eq!(spans, vec![(0, SLOT_BYTES as usize), (0, SLOT_BYTES as usize)]);
    }

    #[test]
    fn session_overflow_grows_the_vertex_buffer() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor {
            capacity: 2,
            capabilities: BatchCapabilities::empty(),
        });
        let before = batch.vertex_buffer.id();
        let pass = device.begin_pass();
        let log = pass.log();
        batch.begin(Box::new(pass), target).unwrap();

        for _ in 0..3 {
            batch.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        }
        batch.end().unwrap();

        // The overflow flush does not fit behind the first two slots, so the
        // buffer is reallocated and the upload continues at its session
        // offset in the new one.
        assert_ne!(batch.vertex_buffer.id(), before);
        assert_eq!(batch.vertex_slots, 4);
        assert_eq!(
            device.write_spans_to(&batch.vertex_buffer),
            vec![(2 * SLOT_BYTES, SLOT_BYTES as usize)]
        );
        assert_eq!(log.base_vertices(), vec![0, 8]);
    }

    #[test]
    fn camera_uniforms_are_written_once_per_value() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        let pass = device.begin_pass();
        let log = pass.log();
        batch.begin(Box::new(pass), target).unwrap();

        batch.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.push_projection(Mat4::IDENTITY).unwrap();
        batch.fill_rect(Rect::new(4.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.pop_projection().unwrap();
        batch.fill_rect(Rect::new(8.0, 0.0, 4.0, 4.0), Color::WHITE).unwrap();
        batch.end().unwrap();

        // Two camera values, two immutable uniform buffers; the third flush
        // rebinds the first set instead of rewriting a shared buffer.
        let camera_sets = log.resource_sets_at(0);
        assert_eq!(camera_sets.len(), 3);
        assert_ne!(camera_sets[0], camera_sets[1]);
        assert_eq!(camera_sets[0], camera_sets[2]);
        assert_eq!(batch.camera_sets.len(), 2);

        let camera_writes = device
            .calls()
            .iter()
            .filter(|c| matches!(c, kiln_gpu::DeviceCall::WriteBuffer { size, .. } if *size == CAMERA_BYTES))
            .count();
        assert_eq!(camera_writes, 2);
    }

    #[test]
    fn vertex_upload_covers_only_pending_slots() {
        let (device, mut batch, target) = harness(SpriteBatchDescriptor::default());
        batch.begin(Box::new(device.begin_pass()), target).unwrap();
        batch
            .fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE)
            .unwrap();
        batch.end().unwrap();

        let writes = device.writes_to(&batch.vertex_buffer);
        assert_eq!(writes, vec![4 * std::mem::size_of::<BatchVertex>()]);
    }
}
