//! Worker pool resizing while the pipeline is live.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use lucent_engine::{Engine, OneShotWhence};

use common::fixture;

fn finish_at(engine: &Arc<Engine>, frame: u64) {
    let weak = Arc::downgrade(engine);
    engine.add_one_shot_callback(OneShotWhence::Absolute, frame, move |_, _| {
        if let Some(engine) = weak.upgrade() {
            engine.finish();
        }
    });
}

/// Records, for every frame, how many workers participated and what pool
/// size they were told about.
fn track_participation(
    engine: &Arc<Engine>,
) -> Arc<Mutex<BTreeMap<u64, (usize, usize)>>> {
    let log: Arc<Mutex<BTreeMap<u64, (usize, usize)>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let weak = Arc::downgrade(engine);
    let sink = Arc::clone(&log);
    engine.register_parallel_pre_render_callback(move |_, num_procs| {
        let Some(engine) = weak.upgrade() else { return };
        let serial = engine.frame_state().frame_serial;
        let mut log = sink.lock();
        let entry = log.entry(serial).or_insert((0, num_procs));
        entry.0 += 1;
        assert_eq!(entry.1, num_procs, "workers disagree on pool size");
    });
    log
}

fn resize_at(engine: &Arc<Engine>, frame: u64, workers: usize) {
    let weak: Weak<Engine> = Arc::downgrade(engine);
    engine.add_one_shot_callback(OneShotWhence::Absolute, frame, move |_, _| {
        if let Some(engine) = weak.upgrade() {
            engine.change_num_workers(workers).unwrap();
        }
    });
}

#[test]
fn pool_grows_and_shrinks_at_frame_boundaries() {
    let f = fixture(2);
    let log = track_participation(&f.engine);
    // The request lands after the frame's resize decision, so it takes
    // effect at the end of the following frame.
    resize_at(&f.engine, 3, 4);
    resize_at(&f.engine, 6, 1);
    finish_at(&f.engine, 9);

    f.engine.begin_rendering(true).unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 9);
    for (serial, (participants, num_procs)) in log.iter() {
        assert_eq!(
            participants, num_procs,
            "frame {serial}: participation does not match the advertised size"
        );
        let expected = match serial {
            1..=4 => 2,
            5..=7 => 4,
            _ => 1,
        };
        assert_eq!(*num_procs, expected, "frame {serial}");
    }
    assert_eq!(f.engine.live_worker_count(), 1);
}

#[test]
fn requesting_the_current_size_is_a_no_op() {
    let f = fixture(2);
    let log = track_participation(&f.engine);
    resize_at(&f.engine, 2, 2);
    finish_at(&f.engine, 5);

    f.engine.begin_rendering(true).unwrap();

    let log = log.lock();
    assert!(log.values().all(|(_, num_procs)| *num_procs == 2));
}

#[test]
fn late_comers_render_their_share_of_the_image() {
    let f = fixture(1);
    // Grow to 3 workers, then force a re-render with a transaction so the
    // enlarged pool actually renders a frame together.
    resize_at(&f.engine, 2, 3);
    {
        let weak = Arc::downgrade(&f.engine);
        f.engine
            .add_one_shot_callback(OneShotWhence::Absolute, 5, move |_, _| {
                let Some(engine) = weak.upgrade() else { return };
                engine.add_transaction(
                    "poke",
                    lucent_engine::TransactionPolicy::OneShot,
                    |_| {},
                );
            });
    }
    finish_at(&f.engine, 8);

    f.engine.begin_rendering(true).unwrap();

    // Frame 1 renders on the old pool, frame 6 on the grown one; 4 tiles
    // each time.
    assert_eq!(f.sampler.tiles(), 8);
    assert_eq!(f.engine.live_worker_count(), 3);
}
