//! Cameras and the uniform block they upload.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// The per-pass camera uniform block: 128 bytes, two column-major matrices.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub projection: Mat4,
    pub view: Mat4,
}

static_assertions::const_assert_eq!(std::mem::size_of::<CameraUniform>(), 128);

#[derive(Debug, Clone, Copy, PartialEq)]
enum ProjectionKind {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        width: f32,
        height: f32,
        near: f32,
        far: f32,
    },
}

/// A positionable camera with cached view/projection matrices.
///
/// Matrices are recomputed eagerly when a setter changes something, so the
/// getters stay `&self` and cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Vec3,
    target: Vec3,
    up: Vec3,
    projection_kind: ProjectionKind,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::with_projection(ProjectionKind::Perspective {
            fov_y,
            aspect,
            near,
            far,
        })
    }

    /// Centered orthographic projection spanning `width` x `height` world
    /// units.
    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Self::with_projection(ProjectionKind::Orthographic {
            width,
            height,
            near,
            far,
        })
    }

    fn with_projection(projection_kind: ProjectionKind) -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 0.0, 1.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection_kind,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.recompute();
        camera
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.recompute();
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
        self.recompute();
    }

    /// Update the aspect ratio, e.g. after a window resize. No-op for
    /// orthographic cameras.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let ProjectionKind::Perspective { aspect: a, .. } = &mut self.projection_kind {
            *a = aspect;
            self.recompute();
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            projection: self.projection,
            view: self.view,
        }
    }

    fn recompute(&mut self) {
        self.view = Mat4::look_at_rh(self.position, self.target, self.up);
        self.projection = match self.projection_kind {
            ProjectionKind::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            ProjectionKind::Orthographic {
                width,
                height,
                near,
                far,
            } => Mat4::orthographic_rh(
                -width * 0.5,
                width * 0.5,
                -height * 0.5,
                height * 0.5,
                near,
                far,
            ),
        };
    }
}
