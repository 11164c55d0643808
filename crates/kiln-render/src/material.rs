//! Mesh materials.

use crate::effect::Effect;
use crate::texture::Texture2d;
use kiln_gpu::{BlendMode, DepthStencilMode, RasterMode};
use std::sync::Arc;

/// How a mesh is shaded: the effect plus the pipeline state it runs under.
///
/// `translucent` routes the renderable into the back-to-front queue; it is a
/// property of the material, not of the draw call.
#[derive(Clone)]
pub struct Material {
    pub effect: Arc<Effect>,
    pub blend: BlendMode,
    pub depth_stencil: DepthStencilMode,
    pub raster: RasterMode,
    pub translucent: bool,
    pub base_texture: Option<Arc<Texture2d>>,
}

impl Material {
    /// An opaque material: no blending, depth test and write.
    pub fn opaque(effect: Arc<Effect>) -> Self {
        Self {
            effect,
            blend: BlendMode::Replace,
            depth_stencil: DepthStencilMode::read_write(),
            raster: RasterMode::cull_back(),
            translucent: false,
            base_texture: None,
        }
    }

    /// A translucent material: alpha blending, depth test without write.
    pub fn translucent(effect: Arc<Effect>) -> Self {
        Self {
            effect,
            blend: BlendMode::Alpha,
            depth_stencil: DepthStencilMode::read_only(),
            raster: RasterMode::cull_back(),
            translucent: true,
            base_texture: None,
        }
    }

    pub fn with_texture(mut self, texture: Arc<Texture2d>) -> Self {
        self.base_texture = Some(texture);
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}
