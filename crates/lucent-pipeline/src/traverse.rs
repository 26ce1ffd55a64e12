//! Image traversal.

use anyhow::Result;
use rand::RngCore;

use lucent_interface::{ImageTraverser, RenderContext, RenderImage, Tile};

pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Splits the image into fixed-size tiles and distributes them through the
/// active load balancer. Tiles are numbered row-major, so a contiguous
/// balancer yields horizontal bands and a cyclic one interleaves rows.
pub struct TiledImageTraverser {
    tile_size: u32,
}

impl TiledImageTraverser {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
        }
    }

    fn tile(&self, index: usize, xres: u32, yres: u32) -> Tile {
        let tiles_x = xres.div_ceil(self.tile_size) as usize;
        let tx = (index % tiles_x) as u32;
        let ty = (index / tiles_x) as u32;
        let x0 = tx * self.tile_size;
        let y0 = ty * self.tile_size;
        Tile {
            x0,
            y0,
            x1: (x0 + self.tile_size).min(xres),
            y1: (y0 + self.tile_size).min(yres),
        }
    }
}

impl Default for TiledImageTraverser {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl ImageTraverser for TiledImageTraverser {
    fn render_image(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        image: &dyn RenderImage,
    ) -> Result<()> {
        let spec = image.spec();
        let tiles_x = spec.xres.div_ceil(self.tile_size) as usize;
        let tiles_y = spec.yres.div_ceil(self.tile_size) as usize;
        let mut first_error = None;
        ctx.load_balancer.for_each_assignment(
            ctx.proc,
            ctx.num_procs,
            tiles_x * tiles_y,
            &mut |index| {
                if first_error.is_some() {
                    return;
                }
                let tile = self.tile(index, spec.xres, spec.yres);
                if let Err(err) = ctx.pixel_sampler.render_tile(ctx, rng, tile, image) {
                    first_error = Some(err);
                }
            },
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
