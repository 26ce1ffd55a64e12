//! Basic scene and camera implementations.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use lucent_interface::{Camera, Color, PreprocessContext, Ray, Scene};

/// A scene with nothing in it but a background color.
#[derive(Debug)]
pub struct StaticScene {
    background: Color,
}

impl StaticScene {
    pub fn new(background: Color) -> Self {
        Self { background }
    }
}

impl Default for StaticScene {
    fn default() -> Self {
        Self::new(Color::new(0.2, 0.3, 0.5))
    }
}

impl Scene for StaticScene {
    fn preprocess(&self, _ctx: &PreprocessContext<'_>) -> Result<()> {
        Ok(())
    }

    fn background(&self) -> Color {
        self.background
    }
}

/// A pinhole camera looking down `-z` from `eye`. The aspect ratio is the
/// only runtime-mutable part; it lives in an atomic because resolution
/// changes land while workers are generating rays.
pub struct PinholeCamera {
    eye: [f64; 3],
    /// Tangent of half the vertical field of view.
    half_tan: f64,
    aspect_bits: AtomicU64,
}

impl PinholeCamera {
    pub fn new(eye: [f64; 3], vfov_degrees: f64) -> Self {
        Self {
            eye,
            half_tan: (vfov_degrees.to_radians() / 2.0).tan(),
            aspect_bits: AtomicU64::new(1.0_f64.to_bits()),
        }
    }

    fn aspect(&self) -> f64 {
        f64::from_bits(self.aspect_bits.load(Ordering::Acquire))
    }
}

impl Default for PinholeCamera {
    fn default() -> Self {
        Self::new([0.0, 0.0, 0.0], 60.0)
    }
}

impl Camera for PinholeCamera {
    fn preprocess(&self, _ctx: &PreprocessContext<'_>) -> Result<()> {
        Ok(())
    }

    fn set_aspect_ratio(&self, aspect: f64) {
        self.aspect_bits.store(aspect.to_bits(), Ordering::Release);
    }

    fn generate_ray(&self, image_x: f64, image_y: f64) -> Ray {
        let dx = image_x * self.half_tan * self.aspect();
        let dy = image_y * self.half_tan;
        let inv_len = 1.0 / (dx * dx + dy * dy + 1.0).sqrt();
        Ray {
            origin: self.eye,
            direction: [dx * inv_len, dy * inv_len, -inv_len],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rays_are_normalized_and_forward() {
        let camera = PinholeCamera::new([1.0, 2.0, 3.0], 90.0);
        camera.set_aspect_ratio(16.0 / 9.0);
        let ray = camera.generate_ray(0.7, -0.3);
        let len: f64 = ray.direction.iter().map(|c| c * c).sum::<f64>().sqrt();
        assert!((len - 1.0).abs() < 1e-12);
        assert!(ray.direction[2] < 0.0);
        assert_eq!(ray.origin, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn center_ray_ignores_aspect() {
        let camera = PinholeCamera::default();
        camera.set_aspect_ratio(2.0);
        let ray = camera.generate_ray(0.0, 0.0);
        assert_eq!(ray.direction, [0.0, 0.0, -1.0]);
    }
}
