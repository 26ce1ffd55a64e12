use anyhow::Result;
use rand::RngCore;

use crate::context::{ChannelSetupContext, DisplayContext, PreprocessContext, RenderContext, SetupContext};
use crate::image::RenderImage;

/// Linear RGB color, the only pixel currency the scheduler moves around.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn black() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// A single eye ray in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: [f64; 3],
    pub direction: [f64; 3],
}

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)` handed out as a unit of
/// render work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

/// Per-channel camera. Preprocessed in parallel every frame; ray generation
/// happens from many workers at once, so implementations carry interior
/// mutability for anything `set_aspect_ratio` touches.
pub trait Camera: Send + Sync {
    fn preprocess(&self, ctx: &PreprocessContext<'_>) -> Result<()>;

    /// Called when the owning channel is created or resized.
    fn set_aspect_ratio(&self, aspect: f64);

    /// Maps normalized image coordinates in `[-1, 1]` to a world-space ray.
    fn generate_ray(&self, image_x: f64, image_y: f64) -> Ray;
}

/// The scene graph boundary. Structural mutation happens only through engine
/// transactions or during the preprocess phase; afterwards all workers read
/// concurrently for the rest of the frame.
pub trait Scene: Send + Sync {
    fn preprocess(&self, ctx: &PreprocessContext<'_>) -> Result<()>;

    fn background(&self) -> Color {
        Color::black()
    }
}

/// Shades one pixel. Invoked from every worker with that worker's RNG.
pub trait Renderer: Send + Sync {
    fn render_pixel(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        image_x: f64,
        image_y: f64,
    ) -> Color;
}

/// Fills one tile of the image by sampling pixels and delegating shading to
/// the renderer.
pub trait PixelSampler: Send + Sync {
    fn render_tile(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        tile: Tile,
        image: &dyn RenderImage,
    ) -> Result<()>;
}

/// Distributes `total` work units over `num_procs` workers. Implementations
/// must partition the units: every unit is visited by exactly one worker per
/// frame.
pub trait LoadBalancer: Send + Sync {
    fn for_each_assignment(
        &self,
        proc: usize,
        num_procs: usize,
        total: usize,
        visit: &mut dyn FnMut(usize),
    );
}

/// Drives the render phase for one channel. The traverser owns the skip
/// policy: when nothing changed since the previous frame it may decline the
/// frame and let the previous image be shown again.
pub trait ImageTraverser: Send + Sync {
    /// Called by worker 0 whenever the pipeline is (re)configured.
    fn setup_begin(&self, ctx: &SetupContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Whether this frame is worth rendering at all.
    fn wants_frame(&self, ctx: &RenderContext<'_>) -> bool {
        ctx.frame_changed || ctx.first_frame
    }

    fn render_image(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        image: &dyn RenderImage,
    ) -> Result<()>;
}

/// Supplies sub-pixel sample positions.
pub trait SampleGenerator: Send + Sync {
    fn sample_2d(&self, rng: &mut dyn RngCore) -> (f64, f64);
}

/// Occlusion queries, answered against the scene boundary.
pub trait ShadowAlgorithm: Send + Sync {
    fn occluded(&self, scene: &dyn Scene, ray: &Ray) -> bool;
}

/// Consumes completed frames for one channel.
pub trait ImageDisplay: Send + Sync {
    fn setup_display_channel(&self, ctx: &ChannelSetupContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn display_image(&self, ctx: &DisplayContext, image: &dyn RenderImage) -> Result<()>;
}

/// Invoked by worker 0 on frames where the pipeline had nothing to do.
/// Returning `true` requests a pipeline setup pass.
pub trait IdleMode: Send + Sync {
    fn on_idle(&self, ctx: &SetupContext, changed: bool, first_frame: bool) -> bool {
        let _ = (ctx, changed, first_frame);
        false
    }
}
