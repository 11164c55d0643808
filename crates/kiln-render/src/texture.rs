//! 2D textures with memoized binding sets.

use crate::resource_cache::{ResourceSetCache, ResourceSetKey};
use kiln_gpu::{
    BindingResource, Device, GpuResourceLayout, GpuResourceSet, GpuSampler, GpuTexture,
    ResourceBinding, ResourceSetDescriptor, TextureDescriptor, TextureUsages,
};
use parking_lot::Mutex;

/// A sampled 2D texture.
///
/// Owns the per-(sampler, layout) resource-set cache for this texture, so a
/// sprite drawn under two samplers costs two sets total, not two per frame.
pub struct Texture2d {
    texture: GpuTexture,
    sets: Mutex<ResourceSetCache>,
}

impl Texture2d {
    /// Create an RGBA8 texture and upload its pixel data.
    pub fn new(device: &dyn Device, label: &str, width: u32, height: u32, data: &[u8]) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some(label),
            width,
            height,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        });
        device.write_texture(&texture, data);
        Self::from_gpu(texture)
    }

    /// Wrap an already-created texture handle.
    pub fn from_gpu(texture: GpuTexture) -> Self {
        Self {
            texture,
            sets: Mutex::new(ResourceSetCache::new()),
        }
    }

    /// A 1x1 opaque white texture; the stand-in for untextured geometry.
    pub fn white(device: &dyn Device) -> Self {
        Self::new(device, "white", 1, 1, &[255, 255, 255, 255])
    }

    pub fn texture(&self) -> &GpuTexture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// The binding set pairing this texture with `sampler` under `layout`.
    ///
    /// Memoized by sampler and layout identity; repeated calls with the same
    /// pair return the same set without touching the device.
    pub fn resource_set(
        &self,
        device: &dyn Device,
        sampler: &GpuSampler,
        layout: &GpuResourceLayout,
    ) -> GpuResourceSet {
        self.sets.lock().get_or_create(
            ResourceSetKey::SamplerLayout(sampler.id(), layout.id()),
            || {
                device.create_resource_set(&ResourceSetDescriptor {
                    label: Some("texture set"),
                    layout,
                    bindings: &[
                        ResourceBinding {
                            binding: 0,
                            resource: BindingResource::Texture(&self.texture),
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

    /// Number of distinct binding sets built for this texture so far.
    pub fn cached_set_count(&self) -> usize {
        self.sets.lock().len()
    }
}

impl PartialEq for Texture2d {
    fn eq(&self, other: &Self) -> bool {
        self.texture.id() == other.texture.id()
    }
}

impl Eq for Texture2d {}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::{MockDevice, ResourceLayoutDescriptor, SamplerKey};

    #[test]
    fn resource_set_is_memoized_per_sampler() {
        let device = MockDevice::new();
        let texture = Texture2d::white(&device);
        let layout = device.create_resource_layout(&ResourceLayoutDescriptor {
            label: None,
            entries: &[],
        });
        let linear = device.create_sampler(&SamplerKey::linear());
        let nearest = device.create_sampler(&SamplerKey::nearest());

        let a = texture.resource_set(&device, &linear, &layout);
        let b = texture.resource_set(&device, &linear, &layout);
        let c = texture.resource_set(&device, &nearest, &layout);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(device.count_resource_set_creates(), 2);
        assert_eq!(texture.cached_set_count(), 2);
    }
}
