//! Growable per-instance transform buffer.

use glam::Mat4;
use kiln_gpu::{
    BufferDescriptor, BufferUsages, Device, GpuBuffer, VertexAttribute, VertexBufferLayout,
};
use tracing::debug;

const TRANSFORM_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

/// A vertex buffer holding per-instance transform matrices.
///
/// Capacity is always a power of two and only ever grows; growth reallocates
/// the GPU buffer wholesale and the old contents are discarded, since the
/// caller re-uploads the full transform list every frame anyway.
pub struct InstanceBuffer {
    label: &'static str,
    buffer: GpuBuffer,
    capacity: u32,
}

impl InstanceBuffer {
    /// Create with room for `initial` transforms (rounded up to a power of
    /// two, floor 1).
    pub fn new(device: &dyn Device, label: &'static str, initial: u32) -> Self {
        let capacity = initial.max(1).next_power_of_two();
        let buffer = Self::allocate(device, label, capacity);
        Self {
            label,
            buffer,
            capacity,
        }
    }

    fn allocate(device: &dyn Device, label: &'static str, capacity: u32) -> GpuBuffer {
        device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * TRANSFORM_SIZE,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
        })
    }

    /// The instance-stepped buffer layout: one `mat4x4` per instance as four
    /// `vec4` columns at shader locations 3..=6.
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            stride: TRANSFORM_SIZE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: (0..4)
                .map(|column| VertexAttribute {
                    format: wgpu::VertexFormat::Float32x4,
                    offset: column as u64 * 16,
                    shader_location: 3 + column,
                })
                .collect(),
        }
    }

    /// Transforms the buffer can hold without reallocating.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Grow to hold at least `count` transforms.
    ///
    /// No-op when `count` is zero or already fits. Otherwise the capacity
    /// doubles up to the next power of two and the buffer is reallocated.
    pub fn ensure_capacity(&mut self, device: &dyn Device, count: u32) {
        if count == 0 || count <= self.capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        debug!(
            label = self.label,
            old = self.capacity,
            new = capacity,
            "growing instance buffer"
        );
        self.buffer = Self::allocate(device, self.label, capacity);
        self.capacity = capacity;
    }

    /// Upload `transforms`, growing first if needed. Only the occupied
    /// prefix of the buffer is written.
    pub fn upload(&mut self, device: &dyn Device, transforms: &[Mat4]) {
        self.upload_at(device, 0, transforms);
    }

    /// Upload `transforms` starting at instance index `first`.
    ///
    /// Queued buffer writes all land before the pass executes, so draws
    /// recorded into one pass must not share instance slots; callers
    /// sub-allocate disjoint ranges with this.
    pub fn upload_at(&mut self, device: &dyn Device, first: u32, transforms: &[Mat4]) {
        if transforms.is_empty() {
            return;
        }
        self.ensure_capacity(device, first + transforms.len() as u32);
        device.write_buffer(
            &self.buffer,
            first as u64 * TRANSFORM_SIZE,
            bytemuck::cast_slice(transforms),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::MockDevice;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 1);

        instances.ensure_capacity(&device, 5);
        assert_eq!(instances.capacity(), 8);

        instances.ensure_capacity(&device, 9);
        assert_eq!(instances.capacity(), 16);
    }

    #[test]
    fn ensure_capacity_zero_or_fitting_is_a_noop() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 8);
        let creates = device.count_buffer_creates();

        instances.ensure_capacity(&device, 0);
        instances.ensure_capacity(&device, 8);
        instances.ensure_capacity(&device, 3);

        assert_eq!(instances.capacity(), 8);
        assert_eq!(device.count_buffer_creates(), creates);
    }

    #[test]
    fn upload_writes_only_the_occupied_prefix() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 8);

        instances.upload(&device, &[Mat4::IDENTITY; 3]);

        assert_eq!(
            device.writes_to(instances.buffer()),
            vec![3 * std::mem::size_of::<Mat4>()]
        );
    }

    #[test]
    fn offset_uploads_land_in_disjoint_spans() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 8);

        instances.upload_at(&device, 0, &[Mat4::IDENTITY; 3]);
        instances.upload_at(&device, 3, &[Mat4::IDENTITY; 2]);

        assert_eq!(
            device.write_spans_to(instances.buffer()),
            vec![(0, 192), (192, 128)]
        );
    }

    #[test]
    fn offset_upload_grows_past_the_end() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 4);

        instances.upload_at(&device, 3, &[Mat4::IDENTITY; 3]);

        assert_eq!(instances.capacity(), 8);
    }

    #[test]
    fn growth_reallocates_the_gpu_buffer() {
        let device = MockDevice::new();
        let mut instances = InstanceBuffer::new(&device, "test", 1);
        let before = instances.buffer().id();

        instances.upload(&device, &[Mat4::IDENTITY; 4]);

        assert_ne!(instances.buffer().id(), before);
        assert_eq!(instances.capacity(), 4);
    }
}
