//! Shading.

use rand::RngCore;

use lucent_interface::{Color, Ray, RenderContext, Renderer, Scene, ShadowAlgorithm};

/// Shades every pixel with the scene background, dimmed when the eye ray is
/// occluded. Exercises the full camera, scene and shadow seams without any
/// geometry traversal of its own.
#[derive(Debug, Default)]
pub struct FlatRenderer;

impl Renderer for FlatRenderer {
    fn render_pixel(
        &self,
        ctx: &RenderContext<'_>,
        _rng: &mut dyn RngCore,
        image_x: f64,
        image_y: f64,
    ) -> Color {
        let ray = ctx.camera.generate_ray(image_x, image_y);
        let color = ctx.scene.background();
        if ctx.shadow_algorithm.occluded(ctx.scene, &ray) {
            Color::new(color.r * 0.5, color.g * 0.5, color.b * 0.5)
        } else {
            color
        }
    }
}

/// Occlusion queries always miss.
#[derive(Debug, Default)]
pub struct NoShadows;

impl ShadowAlgorithm for NoShadows {
    fn occluded(&self, _scene: &dyn Scene, _ray: &Ray) -> bool {
        false
    }
}
