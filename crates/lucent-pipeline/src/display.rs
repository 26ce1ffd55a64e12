//! Image sinks.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use lucent_interface::{DisplayContext, ImageDisplay, RenderImage};

/// Swallows frames and counts them. The default sink for headless runs and
/// the only one the scheduler tests need.
#[derive(Debug, Default)]
pub struct NullImageDisplay {
    displayed: AtomicU64,
}

impl NullImageDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn displayed(&self) -> u64 {
        self.displayed.load(Ordering::Acquire)
    }
}

impl ImageDisplay for NullImageDisplay {
    fn display_image(&self, ctx: &DisplayContext, image: &dyn RenderImage) -> Result<()> {
        self.displayed.fetch_add(1, Ordering::AcqRel);
        let spec = image.spec();
        tracing::trace!(
            frame_index = ctx.frame_index,
            xres = spec.xres,
            yres = spec.yres,
            "frame displayed"
        );
        Ok(())
    }
}
