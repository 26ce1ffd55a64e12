//! Pixel sampling.

use anyhow::Result;
use rand::{Rng, RngCore};

use lucent_interface::{PixelSampler, RenderContext, RenderImage, SampleGenerator, Tile};

/// One sample per pixel. The sample generator supplies the sub-pixel
/// position; the sampled color is written straight to the image.
#[derive(Debug, Default)]
pub struct SimplePixelSampler;

impl PixelSampler for SimplePixelSampler {
    fn render_tile(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        tile: Tile,
        image: &dyn RenderImage,
    ) -> Result<()> {
        let spec = image.spec();
        let xscale = 2.0 / spec.xres as f64;
        let yscale = 2.0 / spec.yres as f64;
        for y in tile.y0..tile.y1 {
            for x in tile.x0..tile.x1 {
                let (sx, sy) = ctx.sample_generator.sample_2d(rng);
                // Pixel center plus jitter, mapped to [-1, 1] with y up.
                let image_x = (x as f64 + sx) * xscale - 1.0;
                let image_y = 1.0 - (y as f64 + sy) * yscale;
                let color = ctx.renderer.render_pixel(ctx, rng, image_x, image_y);
                image.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}

/// Uniformly random sub-pixel positions in `[0, 1)`.
#[derive(Debug, Default)]
pub struct UniformSampleGenerator;

impl SampleGenerator for UniformSampleGenerator {
    fn sample_2d(&self, rng: &mut dyn RngCore) -> (f64, f64) {
        (rng.gen::<f64>(), rng.gen::<f64>())
    }
}

/// Always samples the pixel center. Deterministic output for tests and
/// static scenes.
#[derive(Debug, Default)]
pub struct CenterSampleGenerator;

impl SampleGenerator for CenterSampleGenerator {
    fn sample_2d(&self, _rng: &mut dyn RngCore) -> (f64, f64) {
        (0.5, 0.5)
    }
}
