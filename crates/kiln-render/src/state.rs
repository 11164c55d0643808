//! The batch's render-state stack.
//!
//! Each pipeline-affecting dimension travels through its own
//! [`StateChannel`]: a baseline value plus an explicit stack of overrides.
//! The requested value (stack top, or baseline when empty) is what the next
//! geometry call will adopt; the current value is what pending geometry was
//! recorded under. A divergence between the two forces a flush before the
//! requested value is adopted.

use crate::defaults::RenderDefaults;
use crate::effect::Effect;
use crate::error::ProtocolError;
use crate::target::RenderTarget;
use glam::Mat4;
use kiln_core::geometry::Rect;
use kiln_gpu::{BlendMode, DepthStencilMode, GpuSampler, RasterMode};
use std::sync::Arc;

/// One render-state dimension: baseline, adopted value, override stack.
#[derive(Debug, Clone)]
pub struct StateChannel<T: Clone + PartialEq> {
    name: &'static str,
    main: T,
    current: T,
    overrides: Vec<T>,
}

impl<T: Clone + PartialEq> StateChannel<T> {
    /// A channel whose baseline and current value are both `value`, with no
    /// overrides.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            main: value.clone(),
            current: value,
            overrides: Vec::new(),
        }
    }

    /// The value the next draw should run under: the top override, or the
    /// baseline when none are pushed.
    pub fn requested(&self) -> &T {
        self.overrides.last().unwrap_or(&self.main)
    }

    /// The value pending geometry was recorded under.
    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn main(&self) -> &T {
        &self.main
    }

    /// Push an override. Takes effect on the next geometry call.
    pub fn push(&mut self, value: T) {
        self.overrides.push(value);
    }

    /// Pop the top override. Errors when the stack is empty rather than
    /// silently clamping, so unbalanced push/pop pairs surface immediately.
    pub fn pop(&mut self) -> Result<(), ProtocolError> {
        self.overrides
            .pop()
            .map(|_| ())
            .ok_or(ProtocolError::PopUnderflow {
                dimension: self.name,
            })
    }

    /// Whether the requested value diverges from the adopted one.
    pub fn is_dirty(&self) -> bool {
        *self.requested() != self.current
    }

    /// Adopt the requested value as current.
    pub fn adopt(&mut self) {
        if self.is_dirty() {
            self.current = self.requested().clone();
        }
    }

    pub fn depth(&self) -> usize {
        self.overrides.len()
    }
}

/// All state dimensions of one batch session.
///
/// Built fresh at `begin` from the session target and the caller's defaults;
/// no state leaks from one session into the next.
pub struct RenderState {
    pub target: StateChannel<Arc<RenderTarget>>,
    pub effect: StateChannel<Arc<Effect>>,
    pub blend: StateChannel<BlendMode>,
    pub depth_stencil: StateChannel<DepthStencilMode>,
    pub raster: StateChannel<RasterMode>,
    pub projection: StateChannel<Mat4>,
    pub view: StateChannel<Mat4>,
    pub sampler: StateChannel<GpuSampler>,
    pub scissor: StateChannel<Option<Rect<u32>>>,
}

impl RenderState {
    pub fn new(target: Arc<RenderTarget>, projection: Mat4, defaults: &RenderDefaults) -> Self {
        Self {
            target: StateChannel::new("target", target),
            effect: StateChannel::new("effect", defaults.sprite_effect.clone()),
            blend: StateChannel::new("blend", defaults.blend),
            depth_stencil: StateChannel::new("depth-stencil", defaults.depth_stencil),
            raster: StateChannel::new("raster", defaults.raster),
            projection: StateChannel::new("projection", projection),
            view: StateChannel::new("view", Mat4::IDENTITY),
            sampler: StateChannel::new("sampler", defaults.sampler.clone()),
            scissor: StateChannel::new("scissor", None),
        }
    }

    /// True when any dimension's requested value diverges from its current
    /// one.
    pub fn any_dirty(&self) -> bool {
        self.target.is_dirty()
            || self.effect.is_dirty()
            || self.blend.is_dirty()
            || self.depth_stencil.is_dirty()
            || self.raster.is_dirty()
            || self.projection.is_dirty()
            || self.view.is_dirty()
            || self.sampler.is_dirty()
            || self.scissor.is_dirty()
    }

    /// Adopt every requested value as current.
    pub fn adopt_all(&mut self) {
        self.target.adopt();
        self.effect.adopt();
        self.blend.adopt();
        self.depth_stencil.adopt();
        self.raster.adopt();
        self.projection.adopt();
        self.view.adopt();
        self.sampler.adopt();
        self.scissor.adopt();
    }
}
