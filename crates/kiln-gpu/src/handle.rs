//! GPU resource handles that can be real or mock.
//!
//! Every handle is owned, cheap to clone (wgpu resources are reference
//! counted internally) and carries a [`HandleId`] assigned by the device at
//! creation time. Equality and hashing go through that id, which is what the
//! resource-set and pipeline caches key on: two handles compare equal exactly
//! when they name the same GPU object.

/// Stable identity of a GPU object, assigned by the creating device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $inner:ident, $real:ty, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            id: HandleId,
            inner: $inner,
        }

        #[derive(Clone, Debug)]
        enum $inner {
            Real($real),
            #[cfg(feature = "mock")]
            Mock,
        }

        impl $name {
            /// Wrap a real wgpu object.
            pub fn from_wgpu(id: HandleId, raw: $real) -> Self {
                Self {
                    id,
                    inner: $inner::Real(raw),
                }
            }

            /// Create a mock handle (for testing).
            #[cfg(feature = "mock")]
            pub fn mock(id: HandleId) -> Self {
                Self {
                    id,
                    inner: $inner::Mock,
                }
            }

            /// The device-assigned identity of this object.
            pub fn id(&self) -> HandleId {
                self.id
            }

            /// Get the underlying wgpu object.
            ///
            /// # Panics
            /// Panics on a mock handle; only the real backend calls this.
            pub fn as_wgpu(&self) -> &$real {
                match &self.inner {
                    $inner::Real(raw) => raw,
                    #[cfg(feature = "mock")]
                    $inner::Mock => {
                        panic!(concat!("attempted to get wgpu ", $what, " from a mock handle"))
                    }
                }
            }

            /// Check if this is a mock handle.
            #[cfg(feature = "mock")]
            pub fn is_mock(&self) -> bool {
                matches!(self.inner, $inner::Mock)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl std::hash::Hash for $name {
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
    };
}

gpu_handle!(
    /// A sampler object.
    GpuSampler, GpuSamplerInner, wgpu::Sampler, "sampler"
);
gpu_handle!(
    /// A compiled shader module.
    GpuShaderModule, GpuShaderModuleInner, wgpu::ShaderModule, "shader module"
);
gpu_handle!(
    /// A compiled render pipeline.
    GpuPipeline, GpuPipelineInner, wgpu::RenderPipeline, "render pipeline"
);
gpu_handle!(
    /// A resource layout: the declared binding slots a pipeline expects.
    GpuResourceLayout, GpuResourceLayoutInner, wgpu::BindGroupLayout, "bind group layout"
);
gpu_handle!(
    /// A resource set: buffers/textures/samplers bound to a layout's slots.
    GpuResourceSet, GpuResourceSetInner, wgpu::BindGroup, "bind group"
);

/// A GPU buffer handle.
///
/// Carries its byte size so callers can validate uploads without a round
/// trip to the backend.
#[derive(Clone, Debug)]
pub struct GpuBuffer {
    id: HandleId,
    size: u64,
    inner: GpuBufferInner,
}

#[derive(Clone, Debug)]
enum GpuBufferInner {
    Real(wgpu::Buffer),
    #[cfg(feature = "mock")]
    Mock,
}

impl GpuBuffer {
    pub fn from_wgpu(id: HandleId, size: u64, raw: wgpu::Buffer) -> Self {
        Self {
            id,
            size,
            inner: GpuBufferInner::Real(raw),
        }
    }

    #[cfg(feature = "mock")]
    pub fn mock(id: HandleId, size: u64) -> Self {
        Self {
            id,
            size,
            inner: GpuBufferInner::Mock,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Buffer length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the underlying wgpu buffer.
    ///
    /// # Panics
    /// Panics on a mock handle.
    pub fn as_wgpu(&self) -> &wgpu::Buffer {
        match &self.inner {
            GpuBufferInner::Real(raw) => raw,
            #[cfg(feature = "mock")]
            GpuBufferInner::Mock => panic!("attempted to get wgpu buffer from a mock handle"),
        }
    }

    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuBufferInner::Mock)
    }
}

impl PartialEq for GpuBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GpuBuffer {}

impl std::hash::Hash for GpuBuffer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A GPU texture handle with its default view and dimensions.
#[derive(Clone, Debug)]
pub struct GpuTexture {
    id: HandleId,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    inner: GpuTextureInner,
}

#[derive(Clone, Debug)]
enum GpuTextureInner {
    Real {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    },
    #[cfg(feature = "mock")]
    Mock,
}

impl GpuTexture {
    pub fn from_wgpu(
        id: HandleId,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        texture: wgpu::Texture,
        view: wgpu::TextureView,
    ) -> Self {
        Self {
            id,
            width,
            height,
            format,
            inner: GpuTextureInner::Real { texture, view },
        }
    }

    #[cfg(feature = "mock")]
    pub fn mock(id: HandleId, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
            inner: GpuTextureInner::Mock,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Get the underlying wgpu texture.
    ///
    /// # Panics
    /// Panics on a mock handle.
    pub fn as_wgpu(&self) -> &wgpu::Texture {
        match &self.inner {
            GpuTextureInner::Real { texture, .. } => texture,
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock => panic!("attempted to get wgpu texture from a mock handle"),
        }
    }

    /// Get the texture's default view.
    ///
    /// # Panics
    /// Panics on a mock handle.
    pub fn wgpu_view(&self) -> &wgpu::TextureView {
        match &self.inner {
            GpuTextureInner::Real { view, .. } => view,
            #[cfg(feature = "mock")]
            GpuTextureInner::Mock => panic!("attempted to get wgpu view from a mock handle"),
        }
    }

    #[cfg(feature = "mock")]
    pub fn is_mock(&self) -> bool {
        matches!(self.inner, GpuTextureInner::Mock)
    }
}

impl PartialEq for GpuTexture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GpuTexture {}

impl std::hash::Hash for GpuTexture {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
