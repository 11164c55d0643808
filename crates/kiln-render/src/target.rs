//! Off-screen render targets.

use crate::resource_cache::{ResourceSetCache, ResourceSetKey};
use kiln_core::geometry::Viewport;
use kiln_gpu::{
    BindingResource, Device, GpuResourceLayout, GpuResourceSet, GpuSampler, GpuTexture,
    ResourceBinding, ResourceSetDescriptor, TextureDescriptor, TextureUsages,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(0);

/// A color attachment that can also be sampled.
///
/// Identity is stable across resizes: the state stack compares targets by
/// id, while the texture handle underneath is replaced on resize and any
/// binding sets built against the old texture are invalidated.
pub struct RenderTarget {
    id: u64,
    label: String,
    format: wgpu::TextureFormat,
    inner: Mutex<TargetInner>,
}

struct TargetInner {
    color: GpuTexture,
    sets: ResourceSetCache,
}

impl RenderTarget {
    pub fn new(
        device: &dyn Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let color = Self::create_color(device, label, width, height, format);
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            label: label.to_owned(),
            format,
            inner: Mutex::new(TargetInner {
                color,
                sets: ResourceSetCache::new(),
            }),
        }
    }

    /// Wrap an existing texture, e.g. the swapchain image for this frame.
    pub fn from_texture(label: &str, color: GpuTexture) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            label: label.to_owned(),
            format: color.format(),
            inner: Mutex::new(TargetInner {
                color,
                sets: ResourceSetCache::new(),
            }),
        }
    }

    fn create_color(
        device: &dyn Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> GpuTexture {
        device.create_texture(&TextureDescriptor {
            label: Some(label),
            width,
            height,
            format,
            usage: TextureUsages::RENDER_TARGET | TextureUsages::TEXTURE_BINDING,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// The current color texture. Replaced wholesale on resize.
    pub fn color(&self) -> GpuTexture {
        self.inner.lock().color.clone()
    }

    pub fn viewport(&self) -> Viewport {
        let inner = self.inner.lock();
        Viewport {
            width: inner.color.width(),
            height: inner.color.height(),
        }
    }

    /// Recreate the color texture at a new size and drop every binding set
    /// built against the old one. No-op when the size is unchanged.
    pub fn resize(&self, device: &dyn Device, width: u32, height: u32) {
        let mut inner = self.inner.lock();
        if inner.color.width() == width && inner.color.height() == height {
            return;
        }
        debug!(label = %self.label, width, height, "resizing render target");
        inner.color = Self::create_color(device, &self.label, width, height, self.format);
        inner.sets.clear();
    }

    /// The binding set for sampling this target's color under `layout`.
    ///
    /// Memoized until the next resize.
    pub fn resource_set(
        &self,
        device: &dyn Device,
        sampler: &GpuSampler,
        layout: &GpuResourceLayout,
    ) -> GpuResourceSet {
        let mut inner = self.inner.lock();
        let TargetInner { color, sets } = &mut *inner;
        sets.get_or_create(
            ResourceSetKey::SamplerLayout(sampler.id(), layout.id()),
            || {
                device.create_resource_set(&ResourceSetDescriptor {
                    label: Some("target set"),
                    layout,
                    bindings: &[
                        ResourceBinding {
                            binding: 0,
                            resource: BindingResource::Texture(color),
                        },
                        ResourceBinding {
                            binding: 1,
                            resource: BindingResource::Sampler(sampler),
                        },
                    ],
                })
            },
        )
    }

    /// Number of binding sets currently cached against the color texture.
    pub fn cached_set_count(&self) -> usize {
        self.inner.lock().sets.len()
    }
}

impl PartialEq for RenderTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RenderTarget {}
