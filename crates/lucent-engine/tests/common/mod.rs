//! Shared fixtures for the scheduler integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::RngCore;

use lucent_engine::{Engine, EngineOptions, TimeMode};
use lucent_interface::{PixelSampler, RenderContext, RenderImage, Tile};
use lucent_pipeline::{
    AtomicRgbaImage, ContiguousLoadBalancer, FlatRenderer, NoShadows, NullImageDisplay,
    PinholeCamera, SimplePixelSampler, StaticScene, TiledImageTraverser, UniformSampleGenerator,
};

/// A pixel sampler that renders via [`SimplePixelSampler`] and counts the
/// tiles it was handed, so tests can tell which frames actually rendered.
pub struct CountingSampler {
    inner: SimplePixelSampler,
    tiles: AtomicUsize,
}

impl CountingSampler {
    pub fn new() -> Self {
        Self {
            inner: SimplePixelSampler,
            tiles: AtomicUsize::new(0),
        }
    }

    pub fn tiles(&self) -> usize {
        self.tiles.load(Ordering::SeqCst)
    }
}

impl PixelSampler for CountingSampler {
    fn render_tile(
        &self,
        ctx: &RenderContext<'_>,
        rng: &mut dyn RngCore,
        tile: Tile,
        image: &dyn RenderImage,
    ) -> Result<()> {
        self.tiles.fetch_add(1, Ordering::SeqCst);
        self.inner.render_tile(ctx, rng, tile, image)
    }
}

pub struct Fixture {
    pub engine: Arc<Engine>,
    pub display: Arc<NullImageDisplay>,
    pub sampler: Arc<CountingSampler>,
}

/// A fully configured engine: one 16x16 channel, 8 pixel tiles, static time.
pub fn fixture(workers: usize) -> Fixture {
    fixture_with_time(workers, TimeMode::Static)
}

pub fn fixture_with_time(workers: usize, time_mode: TimeMode) -> Fixture {
    let engine = Engine::new(EngineOptions {
        workers,
        time_mode,
        ..EngineOptions::default()
    });
    let display = Arc::new(NullImageDisplay::new());
    let sampler = Arc::new(CountingSampler::new());

    engine.set_scene(Arc::new(StaticScene::default()));
    engine.set_image_traverser(Arc::new(TiledImageTraverser::new(8)));
    engine.set_load_balancer(Arc::new(ContiguousLoadBalancer));
    engine.set_pixel_sampler(Arc::clone(&sampler) as Arc<dyn PixelSampler>);
    engine.set_renderer(Arc::new(FlatRenderer));
    engine.set_sample_generator(Arc::new(UniformSampleGenerator));
    engine.set_shadow_algorithm(Arc::new(NoShadows));
    engine.set_create_image(Arc::new(|spec| Arc::new(AtomicRgbaImage::new(*spec))));
    engine
        .create_channel(
            Arc::clone(&display) as Arc<dyn lucent_interface::ImageDisplay>,
            Arc::new(PinholeCamera::default()),
            false,
            16,
            16,
        )
        .expect("channel creation");

    Fixture {
        engine,
        display,
        sampler,
    }
}
