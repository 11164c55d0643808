#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
}

impl<T> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

impl Rect<f32> {
    pub fn position(&self) -> glam::Vec2 {
        glam::Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> glam::Vec2 {
        glam::Vec2::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

impl<T> Size<T> {
    pub fn new(width: T, height: T) -> Self {
        Size { width, height }
    }
}

/// A framebuffer-sized region in physical pixels.
///
/// Used for default orthographic projections and for resetting the scissor
/// rect after a clipped flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Viewport { width, height }
    }

    /// The full-viewport rect, the state the scissor is restored to.
    pub fn full_rect(&self) -> Rect<u32> {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn size(&self) -> Size<u32> {
        Size::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_full_rect_covers_everything() {
        let vp = Viewport::new(800, 600);
        assert_eq!(vp.full_rect(), Rect::new(0, 0, 800, 600));
    }

    #[test]
    fn viewport_size_matches_dimensions() {
        let vp = Viewport::new(800, 600);
        assert_eq!(vp.size(), Size::new(800, 600));
    }
}
