//! Batch behavior against the mock device: flush admission, state stack
//! semantics, memoization and capability gating.

use glam::{Mat4, Vec2};
use kiln_core::geometry::Rect;
use kiln_gpu::{BlendMode, DepthStencilMode, Device, MockDevice, MockPassLog, PassCall, RasterMode, SamplerKey};
use kiln_render::{
    BatchCapabilities, Color, ProtocolError, RenderDefaults, RenderTarget, SpriteBatch,
    SpriteBatchDescriptor, Texture2d,
};
use std::sync::Arc;

struct Harness {
    device: Arc<MockDevice>,
    defaults: Arc<RenderDefaults>,
    batch: SpriteBatch,
    target: Arc<RenderTarget>,
}

fn harness(capabilities: BatchCapabilities) -> Harness {
    let device = Arc::new(MockDevice::new());
    let defaults = Arc::new(RenderDefaults::new(&*device));
    let batch = SpriteBatch::new(
        device.clone(),
        defaults.clone(),
        SpriteBatchDescriptor {
            capacity: 64,
            capabilities,
        },
    );
    let target = Arc::new(RenderTarget::new(
        &*device,
        "screen",
        640,
        480,
        wgpu::TextureFormat::Rgba8UnormSrgb,
    ));
    Harness {
        device,
        defaults,
        batch,
        target,
    }
}

impl Harness {
    fn open(&mut self) -> MockPassLog {
        let pass = self.device.begin_pass();
        let log = pass.log();
        self.batch
            .begin(Box::new(pass), self.target.clone())
            .unwrap();
        log
    }

    fn rect(&mut self) {
        self.batch
            .fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), Color::WHITE)
            .unwrap();
    }

    fn checker(&self) -> Arc<Texture2d> {
        Arc::new(Texture2d::new(
            &*self.device,
            "checker",
            2,
            2,
            &[0u8; 16],
        ))
    }
}

fn pipelines_in_order(log: &MockPassLog) -> Vec<kiln_gpu::HandleId> {
    log.calls()
        .iter()
        .filter_map(|c| match c {
            PassCall::SetPipeline(id) => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn compatible_geometry_coalesces_into_one_draw() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    for _ in 0..5 {
        h.rect();
    }
    h.batch.draw_line(Vec2::ZERO, Vec2::new(10.0, 10.0), 2.0, Color::RED)
        .unwrap();
    h.batch
        .fill_triangle(Vec2::ZERO, Vec2::X, Vec2::Y, Color::BLUE)
        .unwrap();
    h.batch.end().unwrap();

    // Seven slots, one flush.
    assert_eq!(log.indexed_draws(), vec![(42, 1)]);
    assert_eq!(h.batch.draw_call_count(), 1);
}

#[test]
fn blend_divergence_splits_the_batch() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    h.rect();
    h.batch.push_blend(BlendMode::Additive).unwrap();
    h.rect();
    h.batch.end().unwrap();

    assert_eq!(log.indexed_draws(), vec![(6, 1), (6, 1)]);
    let pipelines = pipelines_in_order(&log);
    assert_eq!(pipelines.len(), 2);
    assert_ne!(pipelines[0], pipelines[1]);
}

#[test]
fn pushing_the_current_value_does_not_flush() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    h.rect();
    // Alpha is already the baseline; no divergence, no flush.
    h.batch.push_blend(BlendMode::Alpha).unwrap();
    h.rect();
    h.batch.end().unwrap();

    assert_eq!(log.draw_count(), 1);
}

#[test]
fn popping_back_restores_the_baseline_pipeline() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    h.rect();
    h.batch.push_blend(BlendMode::Additive).unwrap();
    h.rect();
    h.batch.pop_blend().unwrap();
    h.rect();
    h.batch.end().unwrap();

    let pipelines = pipelines_in_order(&log);
    assert_eq!(pipelines.len(), 3);
    assert_eq!(pipelines[0], pipelines[2]);
    // Only two distinct pipelines were ever compiled for the round trip.
    assert_eq!(h.defaults.sprite_effect.pipeline_count(), 2);
}

#[test]
fn texture_change_flushes_but_repeats_do_not() {
    let mut h = harness(BatchCapabilities::empty());
    let checker = h.checker();
    let log = h.open();

    h.batch
        .draw_texture(&checker, Rect::new(0.0, 0.0, 8.0, 8.0), Color::WHITE)
        .unwrap();
    h.batch
        .draw_texture(&checker, Rect::new(8.0, 0.0, 8.0, 8.0), Color::WHITE)
        .unwrap();
    // Shapes use the white stand-in texture: an identity change.
    h.rect();
    h.batch.end().unwrap();

    assert_eq!(log.indexed_draws(), vec![(12, 1), (6, 1)]);
}

#[test]
fn pop_underflow_names_the_dimension() {
    let mut h = harness(BatchCapabilities::empty());
    h.open();

    assert_eq!(
        h.batch.pop_projection(),
        Err(ProtocolError::PopUnderflow {
            dimension: "projection"
        })
    );
    // The session survives a protocol error.
    h.rect();
    h.batch.end().unwrap();
}

#[test]
fn end_without_begin_is_rejected() {
    let mut h = harness(BatchCapabilities::empty());
    assert!(matches!(
        h.batch.end(),
        Err(ProtocolError::SessionNotOpen)
    ));
}

#[test]
fn split_flushes_upload_split_payloads() {
    let device = Arc::new(MockDevice::new());
    let defaults = Arc::new(RenderDefaults::new(&*device));
    let mut batch = SpriteBatch::new(
        device.clone(),
        defaults,
        SpriteBatchDescriptor {
            capacity: 2,
            capabilities: BatchCapabilities::empty(),
        },
    );
    let target = Arc::new(RenderTarget::new(
        &*device,
        "screen",
        64,
        64,
        wgpu::TextureFormat::Rgba8UnormSrgb,
    ));

    let pass = device.begin_pass();
    let log = pass.log();
    batch.begin(Box::new(pass), target).unwrap();
    for _ in 0..3 {
        batch
            .fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE)
            .unwrap();
    }
    batch.end().unwrap();

    // Vertex uploads are whole slots (144 bytes each); nothing else the
    // batch writes is slot-aligned. Two slots first, the overflow slot after,
    // at disjoint offsets: buffer writes are queued and all complete before
    // the pass executes, so overlapping uploads would corrupt the first draw.
    let slot_bytes = 4 * 36;
    let vertex_writes: Vec<(u64, usize)> = device
        .calls()
        .iter()
        .filter_map(|c| match c {
            kiln_gpu::DeviceCall::WriteBuffer { offset, size, .. }
                if *size % slot_bytes == 0 =>
            {
                Some((*offset, *size))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        vertex_writes,
        vec![(0, 2 * slot_bytes), (2 * slot_bytes as u64, slot_bytes)]
    );
    // Each draw is rebased onto its own span.
    assert_eq!(log.base_vertices(), vec![0, 8]);
}

#[test]
fn every_dimension_pops_back_to_its_baseline() {
    let mut h = harness(BatchCapabilities::SAMPLER_OVERRIDES);
    h.open();

    let base_blend = h.batch.blend().unwrap();
    let base_projection = h.batch.projection().unwrap();
    let base_view = h.batch.view().unwrap();

    let other_target = Arc::new(RenderTarget::new(
        &*h.device,
        "offscreen",
        256,
        256,
        wgpu::TextureFormat::Rgba8UnormSrgb,
    ));
    let nearest = h.device.create_sampler(&SamplerKey::nearest());
    let projection = Mat4::orthographic_rh(0.0, 100.0, 100.0, 0.0, -1.0, 1.0);
    let view = Mat4::from_translation(glam::Vec3::new(5.0, 0.0, 0.0));

    h.batch.push_target(other_target).unwrap();
    h.batch
        .push_effect(h.defaults.mesh_effect.clone())
        .unwrap();
    h.batch.push_blend(BlendMode::Additive).unwrap();
    h.batch
        .push_depth_stencil(DepthStencilMode::read_write())
        .unwrap();
    h.batch.push_raster(RasterMode::cull_back()).unwrap();
    h.batch.push_projection(projection).unwrap();
    h.batch.push_view(view).unwrap();
    h.batch.push_sampler(nearest).unwrap();
    h.batch.push_scissor(Rect::new(1, 1, 10, 10)).unwrap();

    assert_eq!(h.batch.blend().unwrap(), BlendMode::Additive);
    assert_eq!(h.batch.projection().unwrap(), projection);
    assert_eq!(h.batch.view().unwrap(), view);
    assert_eq!(h.batch.scissor().unwrap(), Some(Rect::new(1, 1, 10, 10)));

    // One balanced pop per dimension; a second pop of the same dimension
    // must underflow under its own name, so a pop wired to the wrong
    // channel cannot slip through.
    let underflow = |dimension| Err(ProtocolError::PopUnderflow { dimension });
    h.batch.pop_target().unwrap();
    assert_eq!(h.batch.pop_target(), underflow("target"));
    h.batch.pop_effect().unwrap();
    assert_eq!(h.batch.pop_effect(), underflow("effect"));
    h.batch.pop_blend().unwrap();
    assert_eq!(h.batch.pop_blend(), underflow("blend"));
    h.batch.pop_depth_stencil().unwrap();
    assert_eq!(h.batch.pop_depth_stencil(), underflow("depth-stencil"));
    h.batch.pop_raster().unwrap();
    assert_eq!(h.batch.pop_raster(), underflow("raster"));
    h.batch.pop_projection().unwrap();
    assert_eq!(h.batch.pop_projection(), underflow("projection"));
    h.batch.pop_view().unwrap();
    assert_eq!(h.batch.pop_view(), underflow("view"));
    h.batch.pop_sampler().unwrap();
    assert_eq!(h.batch.pop_sampler(), underflow("sampler"));
    h.batch.pop_scissor().unwrap();
    assert_eq!(h.batch.pop_scissor(), underflow("scissor"));

    assert_eq!(h.batch.blend().unwrap(), base_blend);
    assert_eq!(h.batch.projection().unwrap(), base_projection);
    assert_eq!(h.batch.view().unwrap(), base_view);
    assert_eq!(h.batch.scissor().unwrap(), None);

    // The session is still usable after the round trip.
    h.rect();
    h.batch.end().unwrap();
}

#[test]
fn state_resets_between_sessions() {
    let mut h = harness(BatchCapabilities::empty());
    h.open();
    h.batch.push_blend(BlendMode::Multiply).unwrap();
    h.batch.push_view(Mat4::from_scale(glam::Vec3::splat(2.0))).unwrap();
    h.batch.end().unwrap();

    h.open();
    assert_eq!(h.batch.blend().unwrap(), BlendMode::Alpha);
    assert_eq!(h.batch.view().unwrap(), Mat4::IDENTITY);
    h.batch.end().unwrap();
}

#[test]
fn scissor_applies_and_restores_around_the_draw() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    h.batch
        .push_raster(kiln_gpu::RasterMode::cull_none().with_scissor())
        .unwrap();
    h.batch.push_scissor(Rect::new(10, 10, 100, 100)).unwrap();
    h.rect();
    h.batch.end().unwrap();

    assert_eq!(
        log.scissor_rects(),
        vec![Rect::new(10, 10, 100, 100), Rect::new(0, 0, 640, 480)]
    );
}

#[test]
fn scissor_rect_without_raster_enable_is_ignored() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    h.batch.push_scissor(Rect::new(10, 10, 100, 100)).unwrap();
    h.rect();
    h.batch.end().unwrap();

    assert!(log.scissor_rects().is_empty());
}

#[test]
fn sampler_override_needs_its_capability() {
    let mut h = harness(BatchCapabilities::empty());
    h.open();
    let sampler = h.device.create_sampler(&SamplerKey::nearest());

    assert_eq!(
        h.batch.push_sampler(sampler),
        Err(ProtocolError::MissingCapability(
            BatchCapabilities::SAMPLER_OVERRIDES
        ))
    );
}

#[test]
fn sampler_override_rebinds_and_memoizes_texture_sets() {
    let mut h = harness(BatchCapabilities::SAMPLER_OVERRIDES);
    let checker = h.checker();
    let log = h.open();
    let nearest = h.device.create_sampler(&SamplerKey::nearest());

    let dest = Rect::new(0.0, 0.0, 8.0, 8.0);
    h.batch.draw_texture(&checker, dest, Color::WHITE).unwrap();
    h.batch.push_sampler(nearest).unwrap();
    h.batch.draw_texture(&checker, dest, Color::WHITE).unwrap();
    h.batch.pop_sampler().unwrap();
    h.batch.draw_texture(&checker, dest, Color::WHITE).unwrap();
    h.batch.end().unwrap();

    let material_sets = log.resource_sets_at(1);
    assert_eq!(material_sets.len(), 3);
    assert_ne!(material_sets[0], material_sets[1]);
    // Back under the default sampler the memoized set is reused.
    assert_eq!(material_sets[0], material_sets[2]);
    assert_eq!(checker.cached_set_count(), 2);
}

#[test]
fn layer_depth_needs_its_capability() {
    let mut h = harness(BatchCapabilities::empty());
    let checker = h.checker();
    h.open();

    let result = h.batch.draw_texture_layered(
        &checker,
        Rect::new(0.0, 0.0, 8.0, 8.0),
        Rect::new(0.0, 0.0, 1.0, 1.0),
        Color::WHITE,
        0.5,
    );
    assert_eq!(
        result,
        Err(ProtocolError::MissingCapability(
            BatchCapabilities::LAYER_DEPTH
        ))
    );
}

#[test]
fn instanced_draw_is_a_dedicated_draw_call() {
    let mut h = harness(BatchCapabilities::INSTANCING);
    let checker = h.checker();
    let log = h.open();

    h.rect();
    let transforms = vec![Mat4::IDENTITY; 5];
    h.batch
        .draw_texture_instanced(
            &checker,
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Color::WHITE,
            &transforms,
        )
        .unwrap();
    h.batch.end().unwrap();

    // Pending rect flushes alone, then one six-index quad with 5 instances.
    assert_eq!(log.indexed_draws(), vec![(6, 1), (6, 5)]);
}

#[test]
fn instanced_draws_in_one_session_use_disjoint_ranges() {
    let mut h = harness(BatchCapabilities::INSTANCING);
    let checker = h.checker();
    let log = h.open();

    let dest = Rect::new(0.0, 0.0, 1.0, 1.0);
    h.batch
        .draw_texture_instanced(&checker, dest, Color::WHITE, &[Mat4::IDENTITY; 3])
        .unwrap();
    h.batch
        .draw_texture_instanced(&checker, dest, Color::WHITE, &[Mat4::IDENTITY; 2])
        .unwrap();
    h.batch.end().unwrap();

    // The second upload lands behind the first and its draw addresses its
    // own instance range; sharing instance zero would let the later queued
    // write replace the transforms the first draw reads.
    assert_eq!(log.instance_spans(), vec![(0, 3), (3, 2)]);
}

#[test]
fn instanced_draw_with_no_transforms_is_a_noop() {
    let mut h = harness(BatchCapabilities::INSTANCING);
    let checker = h.checker();
    let log = h.open();

    h.batch
        .draw_texture_instanced(
            &checker,
            Rect::new(0.0, 0.0, 1.0, 1.0),
            Color::WHITE,
            &[],
        )
        .unwrap();
    h.batch.end().unwrap();

    assert_eq!(log.draw_count(), 0);
}

#[test]
fn shapes_produce_expected_slot_counts() {
    let mut h = harness(BatchCapabilities::empty());
    let log = h.open();

    // Radius 10 clamps to the 8-segment floor: 4 slots at two wedges each.
    h.batch
        .fill_circle(Vec2::new(50.0, 50.0), 10.0, Color::GREEN)
        .unwrap();
    h.batch.end().unwrap();

    assert_eq!(log.indexed_draws(), vec![(4 * 6, 1)]);
}

#[test]
fn ended_session_returns_the_pass_and_reopens() {
    let mut h = harness(BatchCapabilities::empty());
    h.open();
    h.rect();
    let pass = h.batch.end().unwrap();
    assert!(!h.batch.is_open());

    h.batch.begin(pass, h.target.clone()).unwrap();
    assert!(h.batch.is_open());
    assert_eq!(h.batch.draw_call_count(), 0);
    h.batch.end().unwrap();
}
