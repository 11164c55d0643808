//! Shader effects with memoized pipeline compilation.
//!
//! An [`Effect`] owns one shader module, its resource layouts (addressed by
//! name, bound by slot index), and a cache of compiled pipelines keyed by
//! the state that actually feeds pipeline creation. Requesting the same
//! combination twice returns the cached pipeline without touching the
//! device.

use ahash::HashMap;
use kiln_gpu::{
    BlendMode, DepthStencilMode, Device, GpuPipeline, GpuResourceLayout, GpuShaderModule,
    RasterMode, RenderPipelineDescriptor, ResourceLayoutDescriptor, ResourceLayoutEntry,
    ShaderModuleDescriptor, VertexBufferLayout,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(0);

/// A named resource layout an effect declares, bound at the slot matching
/// its position in [`EffectDescriptor::layouts`].
pub struct EffectLayout {
    pub name: &'static str,
    pub entries: Vec<ResourceLayoutEntry>,
}

/// Everything needed to build an [`Effect`].
pub struct EffectDescriptor<'a> {
    pub label: &'a str,
    pub wgsl: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    /// Vertex entry for instanced draws; `None` when the effect never draws
    /// instanced.
    pub instanced_vertex_entry: Option<&'a str>,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    /// Extra buffers appended after `vertex_buffers` for instanced draws.
    pub instance_buffers: Vec<VertexBufferLayout>,
    pub layouts: Vec<EffectLayout>,
    pub topology: wgpu::PrimitiveTopology,
}

/// The subset of render state that selects a compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub blend: BlendMode,
    pub depth_stencil: DepthStencilMode,
    pub raster: RasterMode,
    pub target_format: wgpu::TextureFormat,
    pub instanced: bool,
}

/// A shader program plus its layouts and pipeline cache.
pub struct Effect {
    id: u64,
    label: String,
    shader: GpuShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    instanced_vertex_entry: Option<String>,
    vertex_buffers: Vec<VertexBufferLayout>,
    instance_buffers: Vec<VertexBufferLayout>,
    layouts: Vec<(&'static str, GpuResourceLayout)>,
    topology: wgpu::PrimitiveTopology,
    pipelines: Mutex<HashMap<PipelineKey, GpuPipeline>>,
}

impl Effect {
    pub fn new(device: &dyn Device, desc: EffectDescriptor) -> Self {
        let shader = device.create_shader_module(&ShaderModuleDescriptor {
            label: Some(desc.label),
            wgsl: desc.wgsl,
        });
        let layouts = desc
            .layouts
            .into_iter()
            .map(|layout| {
                let built = device.create_resource_layout(&ResourceLayoutDescriptor {
                    label: Some(layout.name),
                    entries: &layout.entries,
                });
                (layout.name, built)
            })
            .collect();
        Self {
            id: NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed),
            label: desc.label.to_owned(),
            shader,
            vertex_entry: desc.vertex_entry.to_owned(),
            fragment_entry: desc.fragment_entry.to_owned(),
            instanced_vertex_entry: desc.instanced_vertex_entry.map(str::to_owned),
            vertex_buffers: desc.vertex_buffers,
            instance_buffers: desc.instance_buffers,
            layouts,
            topology: desc.topology,
            pipelines: Mutex::new(HashMap::default()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The layout registered under `name`, if any.
    pub fn layout(&self, name: &str) -> Option<&GpuResourceLayout> {
        self.layouts
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, layout)| layout)
    }

    /// The bind slot of the layout registered under `name`.
    pub fn slot(&self, name: &str) -> Option<u32> {
        self.layouts
            .iter()
            .position(|(n, _)| *n == name)
            .map(|index| index as u32)
    }

    /// Fetch the pipeline for `key`, compiling it on first use.
    ///
    /// # Panics
    /// Panics when `key.instanced` is set on an effect declared without an
    /// instanced vertex entry; that is an effect-authoring bug, not a
    /// runtime condition.
    pub fn pipeline(&self, device: &dyn Device, key: PipelineKey) -> GpuPipeline {
        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = pipelines.get(&key) {
            return pipeline.clone();
        }

        debug!(effect = %self.label, ?key, "compiling pipeline");
        let vertex_entry = if key.instanced {
            self.instanced_vertex_entry
                .as_deref()
                .expect("effect has no instanced vertex entry")
        } else {
            self.vertex_entry.as_str()
        };
        let mut vertex_buffers = self.vertex_buffers.clone();
        if key.instanced {
            vertex_buffers.extend(self.instance_buffers.iter().cloned());
        }
        let layouts: Vec<&GpuResourceLayout> =
            self.layouts.iter().map(|(_, layout)| layout).collect();

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&self.label),
            shader: &self.shader,
            vertex_entry,
            fragment_entry: &self.fragment_entry,
            vertex_buffers: &vertex_buffers,
            layouts: &layouts,
            target_format: key.target_format,
            blend: key.blend,
            depth_stencil: key.depth_stencil,
            raster: key.raster,
            topology: self.topology,
        });
        pipelines.insert(key, pipeline.clone());
        pipeline
    }

    /// Number of pipelines compiled so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().len()
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Effect {}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::MockDevice;

    fn plain_effect(device: &MockDevice) -> Effect {
        Effect::new(
            device,
            EffectDescriptor {
                label: "test",
                wgsl: "// empty",
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                instanced_vertex_entry: None,
                vertex_buffers: Vec::new(),
                instance_buffers: Vec::new(),
                layouts: vec![
                    EffectLayout {
                        name: "camera",
                        entries: Vec::new(),
                    },
                    EffectLayout {
                        name: "material",
                        entries: Vec::new(),
                    },
                ],
                topology: wgpu::PrimitiveTopology::TriangleList,
            },
        )
    }

    fn key(blend: BlendMode) -> PipelineKey {
        PipelineKey {
            blend,
            depth_stencil: DepthStencilMode::disabled(),
            raster: RasterMode::cull_none(),
            target_format: wgpu::TextureFormat::Rgba8UnormSrgb,
            instanced: false,
        }
    }

    #[test]
    fn pipelines_are_memoized_per_key() {
        let device = MockDevice::new();
        let effect = plain_effect(&device);

        let a = effect.pipeline(&device, key(BlendMode::Alpha));
        let b = effect.pipeline(&device, key(BlendMode::Alpha));
        let c = effect.pipeline(&device, key(BlendMode::Additive));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(device.count_pipeline_creates(), 2);
        assert_eq!(effect.pipeline_count(), 2);
    }

    #[test]
    fn layouts_resolve_by_name_and_slot() {
        let device = MockDevice::new();
        let effect = plain_effect(&device);

        assert!(effect.layout("camera").is_some());
        assert_eq!(effect.slot("camera"), Some(0));
        assert_eq!(effect.slot("material"), Some(1));
        assert_eq!(effect.slot("bones"), None);
    }
}
