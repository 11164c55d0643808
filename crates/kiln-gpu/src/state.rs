//! Hashable pipeline-state descriptions.
//!
//! These are plain value types: they implement `Hash`/`Eq` so the render
//! layer can use them as pipeline- and resource-cache keys, and each knows
//! how to lower itself into the wgpu descriptor the real backend needs.

use std::hash::{Hash, Hasher};

/// Predefined blend modes for common use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// No blending - source completely replaces destination.
    Replace,

    /// Standard alpha blending for transparent content.
    ///
    /// Formula: `src.rgb * src.a + dst.rgb * (1 - src.a)`
    #[default]
    Alpha,

    /// Premultiplied alpha blending.
    ///
    /// Formula: `src.rgb + dst.rgb * (1 - src.a)`
    PremultipliedAlpha,

    /// Additive blending - colors are added together.
    ///
    /// Use for: glow effects, particles, light sources.
    Additive,

    /// Multiplicative blending.
    ///
    /// Use for: shadows, color tinting.
    Multiply,

    /// Custom blend state for advanced use cases.
    Custom(wgpu::BlendState),
}

impl BlendMode {
    /// Convert to the wgpu blend state.
    pub fn to_blend_state(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            BlendMode::PremultipliedAlpha => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            BlendMode::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            BlendMode::Multiply => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Dst,
                    dst_factor: wgpu::BlendFactor::Zero,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::DstAlpha,
                    dst_factor: wgpu::BlendFactor::Zero,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
            BlendMode::Custom(state) => Some(state),
        }
    }
}

/// Depth test/write configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilMode {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: wgpu::CompareFunction,
}

impl DepthStencilMode {
    /// Depth ignored entirely (typical 2D batching).
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            compare: wgpu::CompareFunction::Always,
        }
    }

    /// Test and write, less-or-equal (typical opaque 3D).
    pub fn read_write() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare: wgpu::CompareFunction::LessEqual,
        }
    }

    /// Test without writing (typical translucent 3D).
    pub fn read_only() -> Self {
        Self {
            depth_test: true,
            depth_write: false,
            compare: wgpu::CompareFunction::LessEqual,
        }
    }

    /// Lower into a wgpu depth-stencil state against the given depth format.
    pub fn to_depth_stencil_state(
        self,
        format: wgpu::TextureFormat,
    ) -> Option<wgpu::DepthStencilState> {
        if !self.depth_test && !self.depth_write {
            return None;
        }
        Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write,
            depth_compare: if self.depth_test {
                self.compare
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }
}

impl Default for DepthStencilMode {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Rasterizer configuration.
///
/// `scissor_enabled` gates whether a pushed scissor rect is applied at flush
/// time; the rect itself travels separately through the state stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterMode {
    pub cull: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    pub scissor_enabled: bool,
}

impl RasterMode {
    /// No culling, no scissor. The sprite-batch default.
    pub fn cull_none() -> Self {
        Self {
            cull: None,
            front_face: wgpu::FrontFace::Ccw,
            scissor_enabled: false,
        }
    }

    /// Back-face culling, the mesh-pass default.
    pub fn cull_back() -> Self {
        Self {
            cull: Some(wgpu::Face::Back),
            front_face: wgpu::FrontFace::Ccw,
            scissor_enabled: false,
        }
    }

    pub fn with_scissor(mut self) -> Self {
        self.scissor_enabled = true;
        self
    }
}

impl Default for RasterMode {
    fn default() -> Self {
        Self::cull_none()
    }
}

/// A hashable key for sampler descriptors.
///
/// wgpu's `SamplerDescriptor` holds `f32` LOD clamps and does not implement
/// `Hash`, so the clamps are stored as bit patterns here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerKey {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub address_mode_w: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    /// f32 bits
    pub lod_min_clamp: u32,
    /// f32 bits
    pub lod_max_clamp: u32,
    pub anisotropy_clamp: u16,
}

impl Hash for SamplerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_mode_u.hash(state);
        self.address_mode_v.hash(state);
        self.address_mode_w.hash(state);
        self.mag_filter.hash(state);
        self.min_filter.hash(state);
        self.mipmap_filter.hash(state);
        self.lod_min_clamp.hash(state);
        self.lod_max_clamp.hash(state);
        self.anisotropy_clamp.hash(state);
    }
}

impl SamplerKey {
    fn with_modes(address: wgpu::AddressMode, filter: wgpu::FilterMode) -> Self {
        Self {
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            lod_min_clamp: 0.0f32.to_bits(),
            lod_max_clamp: f32::MAX.to_bits(),
            anisotropy_clamp: 1,
        }
    }

    /// Clamped bilinear filtering, the default.
    pub fn linear() -> Self {
        Self::with_modes(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Linear)
    }

    /// Clamped nearest-neighbor filtering, for pixel art.
    pub fn nearest() -> Self {
        Self::with_modes(wgpu::AddressMode::ClampToEdge, wgpu::FilterMode::Nearest)
    }

    /// Repeating bilinear filtering, for tiled textures.
    pub fn linear_repeat() -> Self {
        Self::with_modes(wgpu::AddressMode::Repeat, wgpu::FilterMode::Linear)
    }

    /// Repeating nearest-neighbor filtering.
    pub fn nearest_repeat() -> Self {
        Self::with_modes(wgpu::AddressMode::Repeat, wgpu::FilterMode::Nearest)
    }

    /// Lower into a wgpu sampler descriptor.
    pub fn to_descriptor<'a>(&self, label: Option<&'a str>) -> wgpu::SamplerDescriptor<'a> {
        wgpu::SamplerDescriptor {
            label,
            address_mode_u: self.address_mode_u,
            address_mode_v: self.address_mode_v,
            address_mode_w: self.address_mode_w,
            mag_filter: self.mag_filter,
            min_filter: self.min_filter,
            mipmap_filter: self.mipmap_filter,
            lod_min_clamp: f32::from_bits(self.lod_min_clamp),
            lod_max_clamp: f32::from_bits(self.lod_max_clamp),
            compare: None,
            anisotropy_clamp: self.anisotropy_clamp,
            border_color: None,
        }
    }
}

impl Default for SamplerKey {
    fn default() -> Self {
        Self::linear()
    }
}

/// One vertex attribute within a [`VertexBufferLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

/// Layout of one vertex or instance buffer feeding a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    #[test]
    fn sampler_key_hash_equality() {
        let key1 = SamplerKey::linear();
        let key2 = SamplerKey::linear();
        let key3 = SamplerKey::nearest();

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);

        let mut hasher1 = DefaultHasher::new();
        let mut hasher2 = DefaultHasher::new();
        key1.hash(&mut hasher1);
        key2.hash(&mut hasher2);
        assert_eq!(hasher1.finish(), hasher2.finish());
    }

    #[test]
    fn disabled_depth_lowers_to_none() {
        let mode = DepthStencilMode::disabled();
        assert!(
            mode.to_depth_stencil_state(wgpu::TextureFormat::Depth32Float)
                .is_none()
        );
    }

    #[test]
    fn blend_presets_lower_to_wgpu() {
        assert_eq!(
            BlendMode::Replace.to_blend_state(),
            Some(wgpu::BlendState::REPLACE)
        );
        assert_eq!(
            BlendMode::Alpha.to_blend_state(),
            Some(wgpu::BlendState::ALPHA_BLENDING)
        );
    }
}
