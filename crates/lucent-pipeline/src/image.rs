//! Shared frame buffers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lucent_interface::{Color, ImageSpec, RenderImage};

/// An RGBA8 frame buffer every worker writes concurrently. Each pixel is one
/// packed `AtomicU32`, so workers writing disjoint regions never contend and
/// overlapping writes still stay well-formed.
pub struct AtomicRgbaImage {
    spec: ImageSpec,
    valid: AtomicBool,
    pixels: Vec<AtomicU32>,
}

impl AtomicRgbaImage {
    pub fn new(spec: ImageSpec) -> Self {
        let mut pixels = Vec::with_capacity(spec.pixel_count());
        pixels.resize_with(spec.pixel_count(), || AtomicU32::new(0));
        Self {
            spec,
            valid: AtomicBool::new(false),
            pixels,
        }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.spec.xres && y < self.spec.yres {
            Some(y as usize * self.spec.xres as usize + x as usize)
        } else {
            None
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        match self.index(x, y) {
            Some(index) => unpack(self.pixels[index].load(Ordering::Relaxed)),
            None => Color::black(),
        }
    }
}

impl RenderImage for AtomicRgbaImage {
    fn spec(&self) -> ImageSpec {
        self.spec
    }

    fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn set_pixel(&self, x: u32, y: u32, color: Color) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index].store(pack(color), Ordering::Relaxed);
        }
    }
}

fn pack(color: Color) -> u32 {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    quantize(color.r) | quantize(color.g) << 8 | quantize(color.b) << 16 | 0xff << 24
}

fn unpack(packed: u32) -> Color {
    Color::new(
        (packed & 0xff) as f32 / 255.0,
        (packed >> 8 & 0xff) as f32 / 255.0,
        (packed >> 16 & 0xff) as f32 / 255.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_round_trip_through_the_packed_form() {
        let image = AtomicRgbaImage::new(ImageSpec::new(false, 4, 3));
        image.set_pixel(2, 1, Color::new(1.0, 0.5, 0.0));
        let got = image.pixel(2, 1);
        assert_eq!(got.r, 1.0);
        assert!((got.g - 0.5).abs() < 1.0 / 255.0);
        assert_eq!(got.b, 0.0);
    }

    #[test]
    fn out_of_bounds_writes_are_dropped() {
        let image = AtomicRgbaImage::new(ImageSpec::new(false, 4, 3));
        image.set_pixel(4, 0, Color::new(1.0, 1.0, 1.0));
        image.set_pixel(0, 3, Color::new(1.0, 1.0, 1.0));
        assert_eq!(image.pixel(3, 2), Color::black());
    }

    #[test]
    fn validity_starts_false_and_follows_the_flag() {
        let image = AtomicRgbaImage::new(ImageSpec::new(false, 2, 2));
        assert!(!image.is_valid());
        image.set_valid(true);
        assert!(image.is_valid());
    }
}
