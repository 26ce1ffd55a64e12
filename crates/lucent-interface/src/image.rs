use crate::components::Color;

/// Resolution and layout of a channel's render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    pub stereo: bool,
    pub xres: u32,
    pub yres: u32,
}

impl ImageSpec {
    pub fn new(stereo: bool, xres: u32, yres: u32) -> Self {
        Self { stereo, xres, yres }
    }

    pub fn pixel_count(&self) -> usize {
        let eyes = if self.stereo { 2 } else { 1 };
        self.xres as usize * self.yres as usize * eyes
    }
}

/// A render target written concurrently by all workers during the render
/// phase and handed to an [`ImageDisplay`](crate::ImageDisplay) afterwards.
///
/// Pixel writes take `&self`: multiple workers write disjoint regions of the
/// same image simultaneously, so implementations must provide their own
/// interior synchronization (atomics, sliced buffers, or similar).
pub trait RenderImage: Send + Sync {
    fn spec(&self) -> ImageSpec;

    /// Marks the image as displayable. Set by the image traverser once a
    /// frame has been fully written.
    fn set_valid(&self, valid: bool);

    fn is_valid(&self) -> bool;

    fn set_pixel(&self, x: u32, y: u32, color: Color);
}
