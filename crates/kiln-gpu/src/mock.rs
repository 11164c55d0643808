//! Call-recording mock backend for testing.
//!
//! [`MockDevice`] and [`MockPass`] record every operation without touching a
//! GPU, so batching behavior (flush counts, upload sizes, draw ordering) can
//! be asserted in plain unit tests.

use crate::device::*;
use crate::handle::*;
use crate::state::SamplerKey;
use kiln_core::geometry::Rect;
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;

/// A recorded device operation.
#[derive(Debug, Clone)]
pub enum DeviceCall {
    CreateBuffer {
        id: HandleId,
        size: u64,
        usage: BufferUsages,
    },
    WriteBuffer {
        buffer: HandleId,
        offset: u64,
        size: usize,
    },
    CreateTexture {
        id: HandleId,
        width: u32,
        height: u32,
    },
    WriteTexture {
        texture: HandleId,
        size: usize,
    },
    CreateSampler {
        id: HandleId,
        key: SamplerKey,
    },
    CreateShaderModule {
        id: HandleId,
    },
    CreateResourceLayout {
        id: HandleId,
    },
    CreateResourceSet {
        id: HandleId,
        layout: HandleId,
    },
    CreateRenderPipeline {
        id: HandleId,
    },
}

/// A recorded render-pass command.
#[derive(Debug, Clone, PartialEq)]
pub enum PassCall {
    SetPipeline(HandleId),
    SetVertexBuffer {
        slot: u32,
        buffer: HandleId,
    },
    SetIndexBuffer(HandleId),
    SetResourceSet {
        slot: u32,
        set: HandleId,
    },
    SetScissor(Rect<u32>),
    DrawIndexed {
        index_count: u32,
        base_vertex: i32,
        first_instance: u32,
        instance_count: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

/// Mock implementation of [`Device`] that records all calls.
///
/// Interior mutability via `parking_lot::Mutex` lets the `&self` trait
/// methods record; the same pattern the real backend uses for id counters.
#[derive(Default)]
pub struct MockDevice {
    calls: Mutex<Vec<DeviceCall>>,
    next_id: Mutex<u64>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> HandleId {
        let mut next = self.next_id.lock();
        let id = HandleId(*next);
        *next += 1;
        id
    }

    fn record(&self, call: DeviceCall) {
        self.calls.lock().push(call);
    }

    /// Get a copy of all recorded calls (for test assertions).
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count_buffer_creates(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CreateBuffer { .. }))
    }

    pub fn count_buffer_writes(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::WriteBuffer { .. }))
    }

    pub fn count_resource_set_creates(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CreateResourceSet { .. }))
    }

    pub fn count_pipeline_creates(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CreateRenderPipeline { .. }))
    }

    pub fn count_sampler_creates(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::CreateSampler { .. }))
    }

    /// Byte sizes of every recorded write into the given buffer, in order.
    pub fn writes_to(&self, buffer: &GpuBuffer) -> Vec<usize> {
        self.write_spans_to(buffer)
            .into_iter()
            .map(|(_, size)| size)
            .collect()
    }

    /// `(offset, size)` of every recorded write into the given buffer, in
    /// order.
    pub fn write_spans_to(&self, buffer: &GpuBuffer) -> Vec<(u64, usize)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::WriteBuffer {
                    buffer: id,
                    offset,
                    size,
                } if *id == buffer.id() => Some((*offset, *size)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Begin recording a mock render pass.
    pub fn begin_pass(&self) -> MockPass {
        MockPass {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Device for MockDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> GpuBuffer {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
        });
        GpuBuffer::mock(id, desc.size)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) {
        self.record(DeviceCall::WriteBuffer {
            buffer: buffer.id(),
            offset,
            size: data.len(),
        });
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> GpuTexture {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateTexture {
            id,
            width: desc.width,
            height: desc.height,
        });
        GpuTexture::mock(id, desc.width, desc.height, desc.format)
    }

    fn write_texture(&self, texture: &GpuTexture, data: &[u8]) {
        self.record(DeviceCall::WriteTexture {
            texture: texture.id(),
            size: data.len(),
        });
    }

    fn create_sampler(&self, key: &SamplerKey) -> GpuSampler {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateSampler { id, key: *key });
        GpuSampler::mock(id)
    }

    fn create_shader_module(&self, _desc: &ShaderModuleDescriptor) -> GpuShaderModule {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateShaderModule { id });
        GpuShaderModule::mock(id)
    }

    fn create_resource_layout(&self, _desc: &ResourceLayoutDescriptor) -> GpuResourceLayout {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateResourceLayout { id });
        GpuResourceLayout::mock(id)
    }

    fn create_resource_set(&self, desc: &ResourceSetDescriptor) -> GpuResourceSet {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateResourceSet {
            id,
            layout: desc.layout.id(),
        });
        GpuResourceSet::mock(id)
    }

    fn create_render_pipeline(&self, _desc: &RenderPipelineDescriptor) -> GpuPipeline {
        let id = self.fresh_id();
        self.record(DeviceCall::CreateRenderPipeline { id });
        GpuPipeline::mock(id)
    }
}

/// Mock implementation of [`RenderPass`].
///
/// The command log lives behind an `Arc`, so a test can keep a
/// [`MockPassLog`] while the pass itself is moved into a batch session.
pub struct MockPass {
    calls: Arc<Mutex<Vec<PassCall>>>,
}

/// A shared view into a [`MockPass`]'s recorded commands.
#[derive(Clone)]
pub struct MockPassLog {
    calls: Arc<Mutex<Vec<PassCall>>>,
}

impl MockPass {
    /// A handle onto this pass's log that survives moving the pass.
    pub fn log(&self) -> MockPassLog {
        MockPassLog {
            calls: self.calls.clone(),
        }
    }
}

impl MockPassLog {
    /// All recorded commands, in submission order.
    pub fn calls(&self) -> Vec<PassCall> {
        self.calls.lock().clone()
    }

    /// The indexed draws, in order, as `(index_count, instance_count)`.
    pub fn indexed_draws(&self) -> Vec<(u32, u32)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PassCall::DrawIndexed {
                    index_count,
                    instance_count,
                    ..
                } => Some((*index_count, *instance_count)),
                _ => None,
            })
            .collect()
    }

    /// Base vertex of every indexed draw, in order.
    pub fn base_vertices(&self) -> Vec<i32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PassCall::DrawIndexed { base_vertex, .. } => Some(*base_vertex),
                _ => None,
            })
            .collect()
    }

    /// `(first_instance, instance_count)` of every indexed draw, in order.
    pub fn instance_spans(&self) -> Vec<(u32, u32)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PassCall::DrawIndexed {
                    first_instance,
                    instance_count,
                    ..
                } => Some((*first_instance, *instance_count)),
                _ => None,
            })
            .collect()
    }

    /// Total number of draw commands (indexed or not).
    pub fn draw_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, PassCall::DrawIndexed { .. } | PassCall::Draw { .. }))
            .count()
    }

    /// Every scissor rect set on the pass, in order.
    pub fn scissor_rects(&self) -> Vec<Rect<u32>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PassCall::SetScissor(rect) => Some(*rect),
                _ => None,
            })
            .collect()
    }

    /// Resource sets bound to the given slot, in order.
    pub fn resource_sets_at(&self, slot: u32) -> Vec<HandleId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PassCall::SetResourceSet { slot: s, set } if *s == slot => Some(*set),
                _ => None,
            })
            .collect()
    }
}

impl RenderPass for MockPass {
    fn set_pipeline(&mut self, pipeline: &GpuPipeline) {
        self.calls.lock().push(PassCall::SetPipeline(pipeline.id()));
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: &GpuBuffer) {
        self.calls.lock().push(PassCall::SetVertexBuffer {
            slot,
            buffer: buffer.id(),
        });
    }

    fn set_index_buffer(&mut self, buffer: &GpuBuffer, _format: wgpu::IndexFormat) {
        self.calls.lock().push(PassCall::SetIndexBuffer(buffer.id()));
    }

    fn set_resource_set(&mut self, slot: u32, set: &GpuResourceSet) {
        self.calls
            .lock()
            .push(PassCall::SetResourceSet { slot, set: set.id() });
    }

    fn set_scissor_rect(&mut self, rect: Rect<u32>) {
        self.calls.lock().push(PassCall::SetScissor(rect));
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.calls.lock().push(PassCall::DrawIndexed {
            index_count: indices.end - indices.start,
            base_vertex,
            first_instance: instances.start,
            instance_count: instances.end - instances.start,
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.calls.lock().push(PassCall::Draw {
            vertex_count: vertices.end - vertices.start,
            instance_count: instances.end - instances.start,
        });
    }
}
