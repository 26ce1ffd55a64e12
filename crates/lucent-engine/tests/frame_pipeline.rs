//! End-to-end runs of the frame pipeline on a live worker pool.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use anyhow::bail;
use rand::RngCore;

use lucent_engine::{Engine, EngineError, OneShotWhence, TimeMode, TransactionPolicy};
use lucent_interface::{PixelSampler, PreprocessContext, RenderContext, RenderImage, Scene, Tile};

use common::fixture;

/// Registers a one-shot that stops the pipeline at the given frame.
fn finish_at(engine: &Arc<Engine>, frame: u64) {
    let weak = Arc::downgrade(engine);
    engine.add_one_shot_callback(OneShotWhence::Absolute, frame, move |_, _| {
        if let Some(engine) = weak.upgrade() {
            engine.finish();
        }
    });
}

#[test]
fn one_shots_fire_in_registration_order_exactly_once() {
    let f = fixture(2);
    let log = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a", "b"] {
        let log = Arc::clone(&log);
        f.engine
            .add_one_shot_callback(OneShotWhence::Absolute, 10, move |proc, _| {
                assert_eq!(proc, 0);
                log.lock().push(tag);
            });
    }
    {
        let log = Arc::clone(&log);
        f.engine
            .add_one_shot_callback(OneShotWhence::Absolute, 3, move |_, _| {
                log.lock().push("early");
            });
    }
    finish_at(&f.engine, 12);

    f.engine.begin_rendering(true).unwrap();
    assert_eq!(*log.lock(), vec!["early", "a", "b"]);
}

#[test]
fn frames_without_changes_are_skipped_but_still_displayed() {
    let f = fixture(2);
    finish_at(&f.engine, 6);

    f.engine.begin_rendering(true).unwrap();

    // 16x16 at 8 pixel tiles: exactly 4 tiles, rendered on the first frame
    // only since nothing changed afterwards.
    assert_eq!(f.sampler.tiles(), 4);
    // The previous image is redisplayed on every skipped frame.
    assert_eq!(f.display.displayed(), 6);
}

#[test]
fn continue_transactions_reapply_each_frame_until_cancelled() {
    let f = fixture(2);
    let hits = Arc::new(AtomicUsize::new(0));

    let id = {
        let hits = Arc::clone(&hits);
        f.engine
            .add_transaction("tick", TransactionPolicy::Continue, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
    };
    {
        let weak = Arc::downgrade(&f.engine);
        f.engine
            .add_one_shot_callback(OneShotWhence::Absolute, 5, move |_, _| {
                if let Some(engine) = weak.upgrade() {
                    engine.cancel_transaction(id);
                }
            });
    }
    finish_at(&f.engine, 8);

    f.engine.begin_rendering(true).unwrap();
    // Applied on frames 1 through 5; the cancellation lands during frame 5
    // and takes effect at the next transaction phase.
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[test]
fn transactions_queued_mid_frame_apply_at_the_next_frame() {
    let f = fixture(2);
    let applied_at = Arc::new(AtomicUsize::new(0));

    {
        let weak = Arc::downgrade(&f.engine);
        let applied_at = Arc::clone(&applied_at);
        f.engine
            .add_one_shot_callback(OneShotWhence::Absolute, 3, move |_, _| {
                let Some(engine) = weak.upgrade() else { return };
                let applied_at = Arc::clone(&applied_at);
                engine.add_transaction("probe", TransactionPolicy::OneShot, move |engine| {
                    applied_at.store(
                        engine.frame_state().frame_serial as usize,
                        Ordering::SeqCst,
                    );
                });
            });
    }
    finish_at(&f.engine, 6);

    f.engine.begin_rendering(true).unwrap();
    assert_eq!(applied_at.load(Ordering::SeqCst), 4);
}

#[test]
fn termination_callbacks_run_once_when_the_pipeline_drains() {
    let f = fixture(2);
    let terminations = Arc::new(AtomicUsize::new(0));
    {
        let terminations = Arc::clone(&terminations);
        f.engine.register_termination_callback(move || {
            terminations.fetch_add(1, Ordering::SeqCst);
        });
    }
    finish_at(&f.engine, 3);

    f.engine.begin_rendering(true).unwrap();
    assert_eq!(terminations.load(Ordering::SeqCst), 1);
    assert!(!f.engine.is_rendering());
}

#[test]
fn fixed_rate_time_advances_by_frame_period() {
    let f = common::fixture_with_time(2, TimeMode::FixedRate { fps: 10.0 });
    let times = Arc::new(Mutex::new(Vec::new()));
    {
        let weak = Arc::downgrade(&f.engine);
        let times = Arc::clone(&times);
        f.engine.register_serial_pre_render_callback(move |_, _| {
            if let Some(engine) = weak.upgrade() {
                times.lock().push(engine.frame_state().time);
            }
        });
    }
    finish_at(&f.engine, 4);

    f.engine.begin_rendering(true).unwrap();
    let times = times.lock();
    assert_eq!(times.len(), 4);
    for (index, time) in times.iter().enumerate() {
        let expected = (index + 1) as f64 / 10.0;
        assert!((time - expected).abs() < 1e-9, "frame {index}: {time}");
    }
}

struct FailingSampler {
    after_tiles: usize,
    seen: AtomicUsize,
}

impl PixelSampler for FailingSampler {
    fn render_tile(
        &self,
        _ctx: &RenderContext<'_>,
        _rng: &mut dyn RngCore,
        _tile: Tile,
        _image: &dyn RenderImage,
    ) -> anyhow::Result<()> {
        if self.seen.fetch_add(1, Ordering::SeqCst) >= self.after_tiles {
            bail!("sampler gave up");
        }
        Ok(())
    }
}

#[test]
fn collaborator_failure_drains_and_surfaces_from_the_blocking_call() {
    let f = fixture(2);
    f.engine.set_pixel_sampler(Arc::new(FailingSampler {
        after_tiles: 2,
        seen: AtomicUsize::new(0),
    }));
    // A safety net in case the failure were swallowed.
    finish_at(&f.engine, 50);

    let err = f.engine.begin_rendering(true).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Collaborator { phase: "render", .. }
    ));
    assert!(!f.engine.is_rendering());
}

#[test]
fn begin_rendering_twice_is_rejected() {
    let f = fixture(2);
    finish_at(&f.engine, 200);

    f.engine.begin_rendering(false).unwrap();
    assert!(matches!(
        f.engine.begin_rendering(false),
        Err(EngineError::AlreadyRendering)
    ));

    f.engine.finish();
    f.engine.block_until_finished().unwrap();
}

#[test]
fn animation_change_reports_force_a_rerender_every_frame() {
    let f = fixture(2);
    // Only worker 1 reports a change; the OR-reduction must still reach
    // worker 0's skip decision.
    f.engine
        .register_parallel_animation_callback(|proc, _| proc == 1);
    finish_at(&f.engine, 5);

    f.engine.begin_rendering(true).unwrap();
    // 4 tiles per frame, re-rendered on all 5 frames.
    assert_eq!(f.sampler.tiles(), 20);
}

#[test]
fn parallel_one_shots_run_once_on_every_worker() {
    let f = fixture(3);
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = Arc::clone(&hits);
        f.engine
            .add_parallel_one_shot_callback(OneShotWhence::Absolute, 2, move |_, num_procs| {
                assert_eq!(num_procs, 3);
                hits.fetch_add(1, Ordering::SeqCst);
            });
    }
    finish_at(&f.engine, 5);

    f.engine.begin_rendering(true).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

struct CountingScene {
    preprocessed: AtomicUsize,
}

impl Scene for CountingScene {
    fn preprocess(&self, _ctx: &PreprocessContext<'_>) -> anyhow::Result<()> {
        self.preprocessed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn mid_frame_scene_swap_preprocesses_on_the_next_frame() {
    let f = fixture(2);
    let scene = Arc::new(CountingScene {
        preprocessed: AtomicUsize::new(0),
    });
    f.engine.set_scene(Arc::clone(&scene) as Arc<dyn Scene>);

    // Swap the scene from a pre-render callback, after this frame's
    // preprocess decision has already been taken.
    {
        let weak = Arc::downgrade(&f.engine);
        let swapped = Arc::clone(&scene);
        f.engine.register_serial_pre_render_callback(move |_, _| {
            let Some(engine) = weak.upgrade() else { return };
            if engine.frame_state().frame_serial == 3 {
                engine.set_scene(Arc::clone(&swapped) as Arc<dyn Scene>);
            }
        });
    }
    finish_at(&f.engine, 5);

    f.engine.begin_rendering(true).unwrap();
    // Both workers preprocess on frame 1 and again on frame 4.
    assert_eq!(scene.preprocessed.load(Ordering::SeqCst), 4);
}

#[test]
fn concurrent_channel_creation_yields_dense_unique_ids() {
    let f = fixture(1);
    let mut threads = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&f.engine);
        threads.push(std::thread::spawn(move || {
            let mut ids = Vec::new();
            for _ in 0..4 {
                let id = engine
                    .create_channel(
                        Arc::new(lucent_pipeline::NullImageDisplay::new()),
                        Arc::new(lucent_pipeline::PinholeCamera::default()),
                        false,
                        8,
                        8,
                    )
                    .unwrap();
                ids.push(id);
            }
            ids
        }));
    }
    let mut all: Vec<usize> = threads
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .map(|id| id.0)
        .collect();
    all.sort_unstable();
    all.dedup();
    // 32 created here plus the fixture's channel 0.
    assert_eq!(all.len(), 32);
    assert_eq!(f.engine.num_channels(), 33);
}
