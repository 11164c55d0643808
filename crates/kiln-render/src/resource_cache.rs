//! Memoization of resource sets.
//!
//! Resource-set creation is comparatively expensive and the inputs repeat
//! every frame, so sets are cached by the identity of the handles that went
//! into them. Handle ids are device-assigned and never reused, which makes
//! them safe cache keys.

use ahash::HashMap;
use kiln_gpu::{GpuResourceSet, HandleId};

/// Identity key of a cached resource set.
///
/// The uniform-buffer sets only vary with the layout; texture sets also vary
/// with the sampler bound next to the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceSetKey {
    /// Keyed by layout identity alone.
    Layout(HandleId),
    /// Keyed by the bound buffer and layout identity.
    BufferLayout(HandleId, HandleId),
    /// Keyed by sampler and layout identity.
    SamplerLayout(HandleId, HandleId),
}

/// A small identity-keyed cache of resource sets.
#[derive(Default)]
pub struct ResourceSetCache {
    entries: HashMap<ResourceSetKey, GpuResourceSet>,
}

impl ResourceSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the set for `key`, building it on first use.
    pub fn get_or_create(
        &mut self,
        key: ResourceSetKey,
        create: impl FnOnce() -> GpuResourceSet,
    ) -> GpuResourceSet {
        self.entries.entry(key).or_insert_with(create).clone()
    }

    /// Drop every cached set. Called when the backing resources change, e.g.
    /// on render-target resize.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lookup_reuses_the_first_set() {
        let mut cache = ResourceSetCache::new();
        let key = ResourceSetKey::Layout(HandleId(7));

        let first = cache.get_or_create(key, || GpuResourceSet::mock(HandleId(100)));
        let second = cache.get_or_create(key, || panic!("must not rebuild"));

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sampler_identity_distinguishes_entries() {
        let mut cache = ResourceSetCache::new();
        let layout = HandleId(1);

        cache.get_or_create(ResourceSetKey::SamplerLayout(HandleId(10), layout), || {
            GpuResourceSet::mock(HandleId(100))
        });
        cache.get_or_create(ResourceSetKey::SamplerLayout(HandleId(11), layout), || {
            GpuResourceSet::mock(HandleId(101))
        });

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_forces_rebuild() {
        let mut cache = ResourceSetCache::new();
        let key = ResourceSetKey::Layout(HandleId(1));

        cache.get_or_create(key, || GpuResourceSet::mock(HandleId(100)));
        cache.clear();
        let rebuilt = cache.get_or_create(key, || GpuResourceSet::mock(HandleId(200)));

        assert_eq!(rebuilt.id(), HandleId(200));
    }
}
