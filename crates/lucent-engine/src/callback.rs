//! Callback registries for the frame pipeline.
//!
//! Registration and unregistration take the writer side of the registry
//! lock; per-frame dispatch takes the reader side just long enough to clone
//! a snapshot, then runs the callbacks without holding any lock. A callback
//! may therefore register or unregister callbacks (including itself) from
//! within its own invocation: removal is deferred and applied by worker 0 at
//! the next transaction phase.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use lucent_interface::SetupCallback;

/// Parallel callbacks run on every worker simultaneously with
/// `(proc, num_procs)`; animation variants report whether they mutated state.
pub type ParallelAnimationFn = dyn Fn(usize, usize) -> bool + Send + Sync;
pub type SerialAnimationFn = dyn FnMut(usize, usize) -> bool + Send;
pub type ParallelPreRenderFn = dyn Fn(usize, usize) + Send + Sync;
pub type SerialPreRenderFn = dyn FnMut(usize, usize) + Send;
pub type TerminationFn = dyn FnMut() + Send;
pub type SerialOneShotFn = Box<dyn FnOnce(usize, usize) + Send + Sync>;
pub type ParallelOneShotFn = dyn Fn(usize, usize) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    ParallelAnimation,
    SerialAnimation,
    ParallelPreRender,
    SerialPreRender,
    Setup,
    Termination,
}

/// Returned by every `register_*` call; feed it back to
/// [`CallbackRegistry::unregister`] to retire the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    id: u64,
    kind: CallbackKind,
}

/// How a one-shot trigger frame is interpreted at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShotWhence {
    /// The trigger is an absolute animation frame serial.
    Absolute,
    /// The trigger is an offset from the frame serial current at
    /// registration.
    Relative,
}

struct Entry<T: ?Sized> {
    id: u64,
    callback: Arc<T>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

#[derive(Default)]
struct Registries {
    parallel_animation: Vec<Entry<ParallelAnimationFn>>,
    serial_animation: Vec<Entry<Mutex<Box<SerialAnimationFn>>>>,
    parallel_pre_render: Vec<Entry<ParallelPreRenderFn>>,
    serial_pre_render: Vec<Entry<Mutex<Box<SerialPreRenderFn>>>>,
    setup: Vec<Entry<Mutex<Box<dyn SetupCallback>>>>,
    termination: Vec<Entry<Mutex<Box<TerminationFn>>>>,
    /// One-shots keyed by `(trigger_frame, insertion_seq)` so duplicates at
    /// the same frame preserve insertion order.
    one_shots: BTreeMap<(u64, u64), SerialOneShotFn>,
    parallel_one_shots: BTreeMap<(u64, u64), Arc<ParallelOneShotFn>>,
}

pub struct CallbackRegistry {
    registries: RwLock<Registries>,
    retired: Mutex<Vec<CallbackHandle>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            registries: RwLock::new(Registries::default()),
            retired: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
        }
    }

    fn handle(&self, kind: CallbackKind) -> CallbackHandle {
        CallbackHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    pub fn register_parallel_animation(
        &self,
        callback: impl Fn(usize, usize) -> bool + Send + Sync + 'static,
    ) -> CallbackHandle {
        let handle = self.handle(CallbackKind::ParallelAnimation);
        self.registries.write().parallel_animation.push(Entry {
            id: handle.id,
            callback: Arc::new(callback),
        });
        handle
    }

    pub fn register_serial_animation(
        &self,
        callback: impl FnMut(usize, usize) -> bool + Send + 'static,
    ) -> CallbackHandle {
        let handle = self.handle(CallbackKind::SerialAnimation);
        self.registries.write().serial_animation.push(Entry {
            id: handle.id,
            callback: Arc::new(Mutex::new(Box::new(callback) as Box<SerialAnimationFn>)),
        });
        handle
    }

    pub fn register_parallel_pre_render(
        &self,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> CallbackHandle {
        let handle = self.handle(CallbackKind::ParallelPreRender);
        self.registries.write().parallel_pre_render.push(Entry {
            id: handle.id,
            callback: Arc::new(callback),
        });
        handle
    }

    pub fn register_serial_pre_render(
        &self,
        callback: impl FnMut(usize, usize) + Send + 'static,
    ) -> CallbackHandle {
        let handle = self.handle(CallbackKind::SerialPreRender);
        self.registries.write().serial_pre_render.push(Entry {
            id: handle.id,
            callback: Arc::new(Mutex::new(Box::new(callback) as Box<SerialPreRenderFn>)),
        });
        handle
    }

    pub fn register_setup(&self, callback: Box<dyn SetupCallback>) -> CallbackHandle {
        let handle = self.handle(CallbackKind::Setup);
        self.registries.write().setup.push(Entry {
            id: handle.id,
            callback: Arc::new(Mutex::new(callback)),
        });
        handle
    }

    pub fn register_termination(
        &self,
        callback: impl FnMut() + Send + 'static,
    ) -> CallbackHandle {
        let handle = self.handle(CallbackKind::Termination);
        self.registries.write().termination.push(Entry {
            id: handle.id,
            callback: Arc::new(Mutex::new(Box::new(callback) as Box<TerminationFn>)),
        });
        handle
    }

    /// Retires a callback. The removal is deferred: the callback may still
    /// run for the frame currently in flight and disappears at the next
    /// registry sweep.
    pub fn unregister(&self, handle: CallbackHandle) {
        self.retired.lock().push(handle);
    }

    /// Applies deferred removals. Called by worker 0 at the transaction
    /// phase, before any snapshot for the new frame is taken.
    pub fn sweep(&self) {
        let retired = {
            let mut retired = self.retired.lock();
            if retired.is_empty() {
                return;
            }
            std::mem::take(&mut *retired)
        };
        let mut registries = self.registries.write();
        for handle in retired {
            match handle.kind {
                CallbackKind::ParallelAnimation => {
                    registries.parallel_animation.retain(|e| e.id != handle.id)
                }
                CallbackKind::SerialAnimation => {
                    registries.serial_animation.retain(|e| e.id != handle.id)
                }
                CallbackKind::ParallelPreRender => {
                    registries.parallel_pre_render.retain(|e| e.id != handle.id)
                }
                CallbackKind::SerialPreRender => {
                    registries.serial_pre_render.retain(|e| e.id != handle.id)
                }
                CallbackKind::Setup => registries.setup.retain(|e| e.id != handle.id),
                CallbackKind::Termination => registries.termination.retain(|e| e.id != handle.id),
            }
        }
    }

    /// Queues a serial one-shot for `trigger_frame` (already resolved to an
    /// absolute frame serial).
    pub fn add_one_shot(
        &self,
        trigger_frame: u64,
        callback: impl FnOnce(usize, usize) + Send + Sync + 'static,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.registries
            .write()
            .one_shots
            .insert((trigger_frame, seq), Box::new(callback));
    }

    pub fn add_parallel_one_shot(
        &self,
        trigger_frame: u64,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.registries
            .write()
            .parallel_one_shots
            .insert((trigger_frame, seq), Arc::new(callback));
    }

    /// Removes and returns every one-shot whose trigger frame is at or before
    /// `frame_serial`, in ascending `(trigger_frame, insertion)` order.
    pub fn take_due_one_shots(
        &self,
        frame_serial: u64,
    ) -> (Vec<SerialOneShotFn>, Vec<Arc<ParallelOneShotFn>>) {
        let mut registries = self.registries.write();
        let serial = split_due(&mut registries.one_shots, frame_serial);
        let parallel = split_due(&mut registries.parallel_one_shots, frame_serial);
        (serial, parallel)
    }

    pub fn animation_snapshot(
        &self,
    ) -> (
        Vec<Arc<ParallelAnimationFn>>,
        Vec<Arc<Mutex<Box<SerialAnimationFn>>>>,
    ) {
        let registries = self.registries.read();
        (
            registries
                .parallel_animation
                .iter()
                .map(|e| Arc::clone(&e.callback))
                .collect(),
            registries
                .serial_animation
                .iter()
                .map(|e| Arc::clone(&e.callback))
                .collect(),
        )
    }

    pub fn pre_render_snapshot(
        &self,
    ) -> (
        Vec<Arc<ParallelPreRenderFn>>,
        Vec<Arc<Mutex<Box<SerialPreRenderFn>>>>,
    ) {
        let registries = self.registries.read();
        (
            registries
                .parallel_pre_render
                .iter()
                .map(|e| Arc::clone(&e.callback))
                .collect(),
            registries
                .serial_pre_render
                .iter()
                .map(|e| Arc::clone(&e.callback))
                .collect(),
        )
    }

    pub fn setup_snapshot(&self) -> Vec<Arc<Mutex<Box<dyn SetupCallback>>>> {
        self.registries
            .read()
            .setup
            .iter()
            .map(|e| Arc::clone(&e.callback))
            .collect()
    }

    pub fn termination_snapshot(&self) -> Vec<Arc<Mutex<Box<TerminationFn>>>> {
        self.registries
            .read()
            .termination
            .iter()
            .map(|e| Arc::clone(&e.callback))
            .collect()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits off every entry keyed at or before `frame_serial` and returns the
/// payloads in key order.
fn split_due<V>(map: &mut BTreeMap<(u64, u64), V>, frame_serial: u64) -> Vec<V> {
    let rest = map.split_off(&(frame_serial + 1, 0));
    let due = std::mem::replace(map, rest);
    due.into_values().collect()
}
