//! The frame pipeline scheduler.
//!
//! A fixed pool of worker threads marches through every frame in lockstep.
//! Worker 0 owns the serial sections (time, transactions, setup, display);
//! everything between two barriers is either run by all workers in parallel
//! or by worker 0 alone while the others head for the next rendezvous.
//!
//! The per-frame phase order:
//!
//! 1. termination check (decided by worker 0 before the opening barrier)
//! 2. transactions, registry sweep, time advance, buffer allocation
//! 3. preprocess (scene and cameras, parallel)
//! 4. animation callbacks
//! 5. pre-render callbacks
//! 6. change-flag reduction
//! 7. render (per active channel, parallel)
//! 8. image validity, idle handling, setup, resize decision
//! 9. one-shot callback dispatch
//! 10. display, then the worker-count transition if one is pending

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};

use lucent_interface::{
    small_rng_factory, Camera, ChannelSetupContext, CreateImageCallback, CreateRngCallback,
    DisplayContext, FrameState, IdleMode, ImageDisplay, ImageTraverser, LoadBalancer, PixelSampler,
    PreprocessContext, RenderContext, Renderer, SampleGenerator, Scene, SetupCallback,
    SetupContext, ShadowAlgorithm,
};

use crate::callback::{CallbackHandle, CallbackRegistry, OneShotWhence, ParallelOneShotFn};
use crate::channel::{Channel, ChannelId, ChannelRegistry};
use crate::error::EngineError;
use crate::sync::{Barrier, StartGate};
use crate::time::{FrameClock, TimeMode};
use crate::transaction::{TransactionId, TransactionPolicy, TransactionQueue};

/// Construction-time knobs. Everything else is reconfigured at runtime
/// through transactions.
pub struct EngineOptions {
    pub workers: usize,
    pub time_mode: TimeMode,
    /// Log each applied transaction at debug level instead of trace.
    pub verbose_transactions: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            time_mode: TimeMode::default(),
            verbose_transactions: false,
        }
    }
}

/// Pluggable pipeline components, swapped atomically as a group per frame.
#[derive(Clone, Default)]
struct Components {
    scene: Option<Arc<dyn Scene>>,
    image_traverser: Option<Arc<dyn ImageTraverser>>,
    load_balancer: Option<Arc<dyn LoadBalancer>>,
    pixel_sampler: Option<Arc<dyn PixelSampler>>,
    renderer: Option<Arc<dyn Renderer>>,
    sample_generator: Option<Arc<dyn SampleGenerator>>,
    shadow_algorithm: Option<Arc<dyn ShadowAlgorithm>>,
    idle_modes: Vec<Arc<dyn IdleMode>>,
}

/// The non-optional view of [`Components`] once rendering is allowed to
/// start.
struct ReadyComponents {
    scene: Arc<dyn Scene>,
    image_traverser: Arc<dyn ImageTraverser>,
    load_balancer: Arc<dyn LoadBalancer>,
    pixel_sampler: Arc<dyn PixelSampler>,
    renderer: Arc<dyn Renderer>,
    sample_generator: Arc<dyn SampleGenerator>,
    shadow_algorithm: Arc<dyn ShadowAlgorithm>,
    idle_modes: Vec<Arc<dyn IdleMode>>,
}

impl Components {
    fn ready(&self) -> Option<ReadyComponents> {
        Some(ReadyComponents {
            scene: self.scene.clone()?,
            image_traverser: self.image_traverser.clone()?,
            load_balancer: self.load_balancer.clone()?,
            pixel_sampler: self.pixel_sampler.clone()?,
            renderer: self.renderer.clone()?,
            sample_generator: self.sample_generator.clone()?,
            shadow_algorithm: self.shadow_algorithm.clone()?,
            idle_modes: self.idle_modes.clone(),
        })
    }
}

pub struct Engine {
    weak_self: Weak<Engine>,
    components: RwLock<Components>,
    create_image: RwLock<Option<CreateImageCallback>>,
    create_rng: RwLock<CreateRngCallback>,
    channels: ChannelRegistry,
    callbacks: CallbackRegistry,
    transactions: TransactionQueue<Engine>,
    clock: FrameClock,

    animation_frame_state: RwLock<FrameState>,
    render_frame_state: RwLock<FrameState>,

    /// The pool size the host asked for; takes effect at the next frame
    /// boundary.
    workers_wanted: AtomicUsize,
    /// The pool size the pipeline is actually running with.
    live_workers: AtomicUsize,
    resize_pending: AtomicBool,
    resize_target: AtomicUsize,

    running: Mutex<bool>,
    finished: Condvar,
    finish_requested: AtomicBool,
    draining: AtomicBool,
    failure: Mutex<Option<EngineError>>,
    handles: Mutex<HashMap<usize, JoinHandle<()>>>,

    frame_barrier: Barrier,
    preprocess_barrier: Barrier,
    reduce_barrier: Barrier,
    render_barrier: Barrier,
    dispatch_barrier: Barrier,
    workers_changed_barrier: Barrier,

    /// Per-worker change flags, OR-reduced once per frame.
    reduction: RwLock<Vec<CachePadded<AtomicBool>>>,
    first_frame: AtomicBool,
    needs_preprocess: AtomicBool,
    /// Latched from `needs_preprocess` by worker 0 once per frame, so a
    /// request arriving mid-frame carries over to the next one instead of
    /// being lost.
    preprocess_frame: AtomicBool,
    pipeline_needs_setup: AtomicBool,
    due_parallel_one_shots: RwLock<Vec<Arc<ParallelOneShotFn>>>,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Arc<Self> {
        let engine = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            components: RwLock::new(Components::default()),
            create_image: RwLock::new(None),
            create_rng: RwLock::new(small_rng_factory()),
            channels: ChannelRegistry::new(),
            callbacks: CallbackRegistry::new(),
            transactions: TransactionQueue::new(),
            clock: FrameClock::new(options.time_mode),
            animation_frame_state: RwLock::new(FrameState::default()),
            render_frame_state: RwLock::new(FrameState::default()),
            workers_wanted: AtomicUsize::new(options.workers.max(1)),
            live_workers: AtomicUsize::new(0),
            resize_pending: AtomicBool::new(false),
            resize_target: AtomicUsize::new(0),
            running: Mutex::new(false),
            finished: Condvar::new(),
            finish_requested: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            failure: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
            frame_barrier: Barrier::new(),
            preprocess_barrier: Barrier::new(),
            reduce_barrier: Barrier::new(),
            render_barrier: Barrier::new(),
            dispatch_barrier: Barrier::new(),
            workers_changed_barrier: Barrier::new(),
            reduction: RwLock::new(Vec::new()),
            first_frame: AtomicBool::new(true),
            needs_preprocess: AtomicBool::new(true),
            preprocess_frame: AtomicBool::new(false),
            pipeline_needs_setup: AtomicBool::new(false),
            due_parallel_one_shots: RwLock::new(Vec::new()),
        });
        engine
            .transactions
            .set_verbose(options.verbose_transactions);
        engine
    }

    // --- configuration -----------------------------------------------------

    pub fn create_channel(
        &self,
        display: Arc<dyn ImageDisplay>,
        camera: Arc<dyn Camera>,
        stereo: bool,
        xres: u32,
        yres: u32,
    ) -> Result<ChannelId, EngineError> {
        self.channels.create(display, camera, stereo, xres, yres)
    }

    pub fn channel(&self, id: ChannelId) -> Result<Arc<Channel>, EngineError> {
        self.channels.get(id)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Changes a channel's resolution. With `change_pipeline` the channel's
    /// frame buffers are reallocated at the new size the next time they come
    /// up for rendering; without it they keep their current size.
    pub fn change_resolution(
        &self,
        id: ChannelId,
        stereo: bool,
        xres: u32,
        yres: u32,
        change_pipeline: bool,
    ) -> Result<(), EngineError> {
        self.channels
            .get(id)?
            .change_resolution(stereo, xres, yres, change_pipeline)
    }

    pub fn set_scene(&self, scene: Arc<dyn Scene>) {
        self.components.write().scene = Some(scene);
        self.needs_preprocess.store(true, Ordering::Release);
    }

    pub fn set_image_traverser(&self, traverser: Arc<dyn ImageTraverser>) {
        self.components.write().image_traverser = Some(traverser);
        self.pipeline_needs_setup.store(true, Ordering::Release);
    }

    pub fn set_load_balancer(&self, load_balancer: Arc<dyn LoadBalancer>) {
        self.components.write().load_balancer = Some(load_balancer);
    }

    pub fn set_pixel_sampler(&self, pixel_sampler: Arc<dyn PixelSampler>) {
        self.components.write().pixel_sampler = Some(pixel_sampler);
    }

    pub fn set_renderer(&self, renderer: Arc<dyn Renderer>) {
        self.components.write().renderer = Some(renderer);
    }

    pub fn set_sample_generator(&self, sample_generator: Arc<dyn SampleGenerator>) {
        self.components.write().sample_generator = Some(sample_generator);
    }

    pub fn set_shadow_algorithm(&self, shadow_algorithm: Arc<dyn ShadowAlgorithm>) {
        self.components.write().shadow_algorithm = Some(shadow_algorithm);
    }

    pub fn add_idle_mode(&self, mode: Arc<dyn IdleMode>) {
        self.components.write().idle_modes.push(mode);
    }

    pub fn set_create_image(&self, create: CreateImageCallback) {
        *self.create_image.write() = Some(create);
    }

    pub fn set_create_rng(&self, create: CreateRngCallback) {
        *self.create_rng.write() = create;
    }

    /// Requests a pipeline setup pass at the next frame.
    pub fn request_pipeline_setup(&self) {
        self.pipeline_needs_setup.store(true, Ordering::Release);
    }

    // --- time --------------------------------------------------------------

    pub fn set_time_mode(&self, mode: TimeMode) {
        self.clock.set_mode(mode);
    }

    pub fn time_mode(&self) -> TimeMode {
        self.clock.mode()
    }

    pub fn set_time(&self, time: f64) {
        self.clock.set_time(time);
    }

    pub fn stop_time(&self) {
        self.clock.stop();
    }

    pub fn start_time(&self) {
        self.clock.start();
    }

    pub fn is_time_stopped(&self) -> bool {
        self.clock.is_stopped()
    }

    /// Snapshot of the frame currently being rendered.
    pub fn frame_state(&self) -> FrameState {
        *self.render_frame_state.read()
    }

    // --- workers -----------------------------------------------------------

    /// Requests a new pool size. The transition happens at the end of the
    /// frame in flight; until then [`Engine::live_worker_count`] reports the
    /// old size.
    pub fn change_num_workers(&self, workers: usize) -> Result<(), EngineError> {
        if workers == 0 {
            return Err(EngineError::invalid("worker count must be at least one"));
        }
        self.workers_wanted.store(workers, Ordering::Release);
        Ok(())
    }

    pub fn num_workers(&self) -> usize {
        self.workers_wanted.load(Ordering::Acquire)
    }

    pub fn live_worker_count(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    // --- callbacks and transactions ----------------------------------------

    pub fn register_setup_callback(&self, callback: Box<dyn SetupCallback>) -> CallbackHandle {
        self.pipeline_needs_setup.store(true, Ordering::Release);
        self.callbacks.register_setup(callback)
    }

    pub fn register_parallel_animation_callback(
        &self,
        callback: impl Fn(usize, usize) -> bool + Send + Sync + 'static,
    ) -> CallbackHandle {
        self.callbacks.register_parallel_animation(callback)
    }

    pub fn register_serial_animation_callback(
        &self,
        callback: impl FnMut(usize, usize) -> bool + Send + 'static,
    ) -> CallbackHandle {
        self.callbacks.register_serial_animation(callback)
    }

    pub fn register_parallel_pre_render_callback(
        &self,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> CallbackHandle {
        self.callbacks.register_parallel_pre_render(callback)
    }

    pub fn register_serial_pre_render_callback(
        &self,
        callback: impl FnMut(usize, usize) + Send + 'static,
    ) -> CallbackHandle {
        self.callbacks.register_serial_pre_render(callback)
    }

    pub fn register_termination_callback(
        &self,
        callback: impl FnMut() + Send + 'static,
    ) -> CallbackHandle {
        self.callbacks.register_termination(callback)
    }

    /// Removal is deferred: the callback may run once more for the frame in
    /// flight.
    pub fn unregister_callback(&self, handle: CallbackHandle) {
        self.callbacks.unregister(handle);
    }

    /// Queues a serial one-shot; it runs on worker 0 at the dispatch phase of
    /// the first frame whose serial reaches the trigger.
    pub fn add_one_shot_callback(
        &self,
        whence: OneShotWhence,
        frame: u64,
        callback: impl FnOnce(usize, usize) + Send + Sync + 'static,
    ) {
        self.callbacks
            .add_one_shot(self.resolve_trigger(whence, frame), callback);
    }

    /// Parallel variant: runs on every worker at the dispatch phase.
    pub fn add_parallel_one_shot_callback(
        &self,
        whence: OneShotWhence,
        frame: u64,
        callback: impl Fn(usize, usize) + Send + Sync + 'static,
    ) {
        self.callbacks
            .add_parallel_one_shot(self.resolve_trigger(whence, frame), callback);
    }

    fn resolve_trigger(&self, whence: OneShotWhence, frame: u64) -> u64 {
        match whence {
            OneShotWhence::Absolute => frame,
            OneShotWhence::Relative => {
                self.animation_frame_state.read().frame_serial + frame
            }
        }
    }

    pub fn add_transaction(
        &self,
        name: &'static str,
        policy: TransactionPolicy,
        action: impl FnMut(&Engine) + Send + 'static,
    ) -> TransactionId {
        self.transactions.add(name, policy, false, action)
    }

    /// A silent transaction mutates state without marking the frame changed,
    /// so a traverser that skips unchanged frames will not re-render for it.
    pub fn add_silent_transaction(
        &self,
        name: &'static str,
        policy: TransactionPolicy,
        action: impl FnMut(&Engine) + Send + 'static,
    ) -> TransactionId {
        self.transactions.add(name, policy, true, action)
    }

    pub fn cancel_transaction(&self, id: TransactionId) {
        self.transactions.cancel(id);
    }

    // --- lifecycle ---------------------------------------------------------

    /// Spawns the worker pool and starts the frame pipeline. With
    /// `block = true` the calling thread becomes worker 0 and the call only
    /// returns once the pipeline has drained.
    ///
    /// Fails without side effects when the configuration is incomplete or a
    /// pipeline is already running.
    pub fn begin_rendering(&self, block: bool) -> Result<(), EngineError> {
        let workers = self.workers_wanted.load(Ordering::Acquire);
        if self.channels.is_empty() {
            return Err(EngineError::invalid(
                "at least one display channel is required",
            ));
        }
        if self.create_image.read().is_none() {
            return Err(EngineError::invalid("image factory is not set"));
        }
        let parts = self
            .components
            .read()
            .ready()
            .ok_or_else(|| EngineError::invalid("pipeline components are incomplete"))?;

        {
            let mut running = self.running.lock();
            if *running {
                return Err(EngineError::AlreadyRendering);
            }
            *running = true;
        }

        self.finish_requested.store(false, Ordering::Release);
        self.draining.store(false, Ordering::Release);
        self.first_frame.store(true, Ordering::Release);
        self.needs_preprocess.store(true, Ordering::Release);
        self.preprocess_frame.store(false, Ordering::Release);
        self.resize_pending.store(false, Ordering::Release);
        self.pipeline_needs_setup.store(false, Ordering::Release);
        *self.failure.lock() = None;
        self.live_workers.store(workers, Ordering::Release);
        *self.reduction.write() = fresh_reduction(workers);

        // Negotiate the pipeline once before the first frame.
        self.run_setup_pass(&parts, workers);
        if let Some(err) = self.failure.lock().take() {
            *self.running.lock() = false;
            return Err(err);
        }

        let gate = Arc::new(StartGate::new());
        let first_spawned = usize::from(block);
        for proc in first_spawned..workers {
            if let Err(err) = self.spawn_worker(proc, Some(Arc::clone(&gate))) {
                gate.abort();
                for (_, handle) in std::mem::take(&mut *self.handles.lock()) {
                    let _ = handle.join();
                }
                *self.running.lock() = false;
                return Err(err);
            }
        }
        tracing::info!(
            workers,
            channels = self.channels.len(),
            "render pipeline started"
        );
        gate.open();

        if block {
            self.worker_loop(0);
            self.block_until_finished()
        } else {
            Ok(())
        }
    }

    /// Asks the pipeline to stop. The frame in flight completes; termination
    /// callbacks run at the top of the next frame.
    pub fn finish(&self) {
        self.finish_requested.store(true, Ordering::Release);
    }

    /// Waits for the pipeline to drain, joins the pool, and surfaces the
    /// first failure recorded during the run.
    pub fn block_until_finished(&self) -> Result<(), EngineError> {
        {
            let mut running = self.running.lock();
            while *running {
                self.finished.wait(&mut running);
            }
        }
        let mut panicked = false;
        for (_, handle) in std::mem::take(&mut *self.handles.lock()) {
            panicked |= handle.join().is_err();
        }
        if let Some(err) = self.failure.lock().take() {
            return Err(err);
        }
        if panicked {
            return Err(EngineError::WorkerPanicked);
        }
        Ok(())
    }

    pub fn is_rendering(&self) -> bool {
        *self.running.lock()
    }

    // --- internals ---------------------------------------------------------

    fn spawn_worker(
        &self,
        proc: usize,
        gate: Option<Arc<StartGate>>,
    ) -> Result<(), EngineError> {
        let engine = self
            .weak_self
            .upgrade()
            .ok_or_else(|| EngineError::invalid("engine is shutting down"))?;
        let handle = thread::Builder::new()
            .name(format!("lucent-worker-{proc}"))
            .spawn(move || {
                if let Some(gate) = &gate {
                    if !gate.wait() {
                        return;
                    }
                }
                engine.worker_loop(proc);
            })
            .map_err(EngineError::WorkerSpawn)?;
        self.handles.lock().insert(proc, handle);
        Ok(())
    }

    fn record_failure(&self, err: EngineError) {
        tracing::warn!(error = %err, "pipeline failure recorded, draining");
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
        self.finish_requested.store(true, Ordering::Release);
    }

    fn record_collaborator(&self, phase: &'static str, source: anyhow::Error) {
        self.record_failure(EngineError::Collaborator { phase, source });
    }

    /// Runs the global and per-channel setup negotiation on the calling
    /// thread (always worker 0 or the starting thread).
    fn run_setup_pass(&self, parts: &ReadyComponents, num_procs: usize) {
        let channels = self.channels.snapshot();
        let ctx = SetupContext {
            num_channels: channels.len(),
            proc: 0,
            num_procs,
        };
        if let Err(err) = parts.image_traverser.setup_begin(&ctx) {
            self.record_collaborator("setup", err);
            return;
        }
        let setups = self.callbacks.setup_snapshot();
        for callback in &setups {
            if let Err(err) = callback.lock().setup_begin(&ctx) {
                self.record_collaborator("setup", err);
                return;
            }
        }
        for channel in &channels {
            let ctx = ChannelSetupContext {
                channel: channel.id().0,
                num_channels: channels.len(),
                proc: 0,
                num_procs,
                spec: channel.spec(),
                pipeline_depth: channel.pipeline_depth(),
            };
            if let Err(err) = channel.display().setup_display_channel(&ctx) {
                self.record_collaborator("setup", err);
                return;
            }
            for callback in &setups {
                if let Err(err) = callback.lock().setup_display_channel(&ctx) {
                    self.record_collaborator("setup", err);
                    return;
                }
            }
        }
        self.needs_preprocess.store(true, Ordering::Release);
    }

    fn display_channels(&self, channels: &[Arc<Channel>], live: usize, serial: u64) {
        for channel in channels {
            if !channel.is_active() {
                continue;
            }
            let depth = channel.pipeline_depth();
            // Show the freshest valid buffer; a skipped frame redisplays the
            // previous one.
            for back in 0..depth {
                let slot = (serial as usize + depth - back) % depth;
                let Some(image) = channel.existing_image(slot) else {
                    continue;
                };
                if !image.is_valid() {
                    continue;
                }
                let ctx = DisplayContext {
                    proc: 0,
                    num_procs: live,
                    frame_index: slot,
                    pipeline_depth: depth,
                };
                if let Err(err) = channel.display().display_image(&ctx, image.as_ref()) {
                    self.record_collaborator("display", err);
                }
                break;
            }
        }
    }

    /// The body of every worker thread. `proc` is the worker's stable index
    /// within the pool for as long as it lives.
    fn worker_loop(&self, proc: usize) {
        let create_rng = self.create_rng.read().clone();
        let mut rng = create_rng(proc);
        let mut live = self.live_workers.load(Ordering::Acquire);

        loop {
            // Phase 1: worker 0 decides before the rendezvous so that every
            // worker sees the same answer for this frame.
            if proc == 0 {
                let drain = self.finish_requested.load(Ordering::Acquire)
                    || self.failure.lock().is_some();
                self.draining.store(drain, Ordering::Release);
            }
            self.frame_barrier.wait(live);
            if self.draining.load(Ordering::Acquire) {
                if proc == 0 {
                    for callback in self.callbacks.termination_snapshot() {
                        (*callback.lock())();
                    }
                    tracing::info!("render pipeline stopped");
                    *self.running.lock() = false;
                    self.finished.notify_all();
                }
                return;
            }

            // Phase 2: the serial frame-advance section.
            let mut serial_one_shots = Vec::new();
            let mut local_changed = false;
            if proc == 0 {
                self.callbacks.sweep();
                let frame = {
                    let mut anim = self.animation_frame_state.write();
                    self.clock.advance(&mut anim);
                    *anim
                };
                *self.render_frame_state.write() = frame;
                local_changed = self.transactions.apply_all(self);
                if local_changed {
                    self.needs_preprocess.store(true, Ordering::Release);
                }
                let (serial, parallel) =
                    self.callbacks.take_due_one_shots(frame.frame_serial);
                serial_one_shots = serial;
                *self.due_parallel_one_shots.write() = parallel;

                if self.pipeline_needs_setup.swap(false, Ordering::AcqRel) {
                    if let Some(parts) = self.components.read().ready() {
                        self.run_setup_pass(&parts, live);
                    }
                }
                // Latch the preprocess request for this frame; anything set
                // from here on is picked up by the next one.
                self.preprocess_frame
                    .store(self.needs_preprocess.swap(false, Ordering::AcqRel), Ordering::Release);
                if let Some(create) = self.create_image.read().clone() {
                    for channel in self.channels.snapshot() {
                        if channel.is_active() {
                            let slot =
                                frame.frame_serial as usize % channel.pipeline_depth();
                            let _ = channel.image_for_slot(slot, create.as_ref());
                        }
                    }
                }
                for slot in self.reduction.read().iter() {
                    slot.store(false, Ordering::Relaxed);
                }
            }
            self.preprocess_barrier.wait(live);

            let frame = *self.render_frame_state.read();
            let first_frame = self.first_frame.load(Ordering::Acquire);
            let channels = self.channels.snapshot();
            let parts = self.components.read().ready();

            if let Some(parts) = &parts {
                // Phase 3: preprocess.
                if self.preprocess_frame.load(Ordering::Acquire) {
                    let ctx = PreprocessContext {
                        proc,
                        num_procs: live,
                        frame: &frame,
                    };
                    if let Err(err) = parts.scene.preprocess(&ctx) {
                        self.record_collaborator("preprocess", err);
                    }
                    for channel in &channels {
                        if !channel.is_active() {
                            continue;
                        }
                        if let Err(err) = channel.camera().preprocess(&ctx) {
                            self.record_collaborator("preprocess", err);
                        }
                    }
                }

                // Phase 4: animation callbacks.
                let (parallel_anim, serial_anim) = self.callbacks.animation_snapshot();
                for callback in &parallel_anim {
                    local_changed |= callback(proc, live);
                }
                if proc == 0 {
                    for callback in &serial_anim {
                        local_changed |= (*callback.lock())(0, live);
                    }
                }

                // Phase 5: pre-render callbacks.
                let (parallel_pre, serial_pre) = self.callbacks.pre_render_snapshot();
                for callback in &parallel_pre {
                    callback(proc, live);
                }
                if proc == 0 {
                    for callback in &serial_pre {
                        (*callback.lock())(0, live);
                    }
                }
            }

            // Phase 6: OR-reduce the change flags.
            {
                let reduction = self.reduction.read();
                if let Some(slot) = reduction.get(proc) {
                    slot.store(local_changed, Ordering::Release);
                }
            }
            self.reduce_barrier.wait(live);
            let frame_changed = {
                let reduction = self.reduction.read();
                reduction
                    .iter()
                    .take(live)
                    .any(|slot| slot.load(Ordering::Acquire))
            };

            // Phase 7: render every active channel that wants the frame.
            let mut rendered = Vec::new();
            if let Some(parts) = &parts {
                for channel in &channels {
                    if !channel.is_active() {
                        continue;
                    }
                    let slot = frame.frame_serial as usize % channel.pipeline_depth();
                    let camera = channel.camera();
                    let ctx = RenderContext {
                        channel: channel.id().0,
                        proc,
                        num_procs: live,
                        frame: &frame,
                        frame_changed,
                        first_frame,
                        camera: camera.as_ref(),
                        scene: parts.scene.as_ref(),
                        load_balancer: parts.load_balancer.as_ref(),
                        pixel_sampler: parts.pixel_sampler.as_ref(),
                        renderer: parts.renderer.as_ref(),
                        shadow_algorithm: parts.shadow_algorithm.as_ref(),
                        sample_generator: parts.sample_generator.as_ref(),
                    };
                    let wants = parts.image_traverser.wants_frame(&ctx);
                    if wants {
                        if let Some(image) = channel.existing_image(slot) {
                            if let Err(err) =
                                parts
                                    .image_traverser
                                    .render_image(&ctx, rng.as_mut(), image.as_ref())
                            {
                                self.record_collaborator("render", err);
                            }
                        }
                    }
                    if proc == 0 {
                        rendered.push((Arc::clone(channel), slot, wants));
                    }
                }
            }
            self.render_barrier.wait(live);

            // Phase 8: worker 0 closes out the frame and decides what the
            // next one looks like.
            if proc == 0 {
                let mut rendered_any = false;
                for (channel, slot, wants) in &rendered {
                    if *wants {
                        if let Some(image) = channel.existing_image(*slot) {
                            image.set_valid(true);
                        }
                        rendered_any = true;
                    }
                }

                if !rendered_any {
                    if let Some(parts) = &parts {
                        let ctx = SetupContext {
                            num_channels: channels.len(),
                            proc: 0,
                            num_procs: live,
                        };
                        for mode in &parts.idle_modes {
                            if mode.on_idle(&ctx, frame_changed, first_frame) {
                                self.pipeline_needs_setup.store(true, Ordering::Release);
                            }
                        }
                    }
                }

                // Warm the next frame's buffers so the render phase never
                // allocates.
                if let Some(create) = self.create_image.read().clone() {
                    for channel in &channels {
                        if channel.is_active() {
                            let slot = (frame.frame_serial as usize + 1)
                                % channel.pipeline_depth();
                            let _ = channel.image_for_slot(slot, create.as_ref());
                        }
                    }
                }

                let wanted = self.workers_wanted.load(Ordering::Acquire);
                if wanted != live {
                    self.resize_target.store(wanted, Ordering::Release);
                    self.resize_pending.store(true, Ordering::Release);
                } else {
                    self.resize_pending.store(false, Ordering::Release);
                }

                self.first_frame.store(false, Ordering::Release);
            }
            self.dispatch_barrier.wait(live);

            // Phase 9: one-shot dispatch.
            let parallel_one_shots = self.due_parallel_one_shots.read().clone();
            for callback in &parallel_one_shots {
                callback(proc, live);
            }
            if proc == 0 {
                for callback in serial_one_shots {
                    callback(0, live);
                }
            }

            // Phase 10: display, worker 0 only.
            if proc == 0 {
                self.display_channels(&channels, live, frame.frame_serial);
            }

            // Worker-count transition, committed while everyone is parked at
            // the old arity.
            if self.resize_pending.load(Ordering::Acquire) {
                self.workers_changed_barrier.wait(live);
                if proc == 0 {
                    self.commit_resize(live);
                }
                self.workers_changed_barrier.wait(live);

                let new_live = self.live_workers.load(Ordering::Acquire);
                if proc >= new_live {
                    tracing::trace!(proc, "worker leaving the pool");
                    return;
                }
                if proc == 0 && new_live < live {
                    self.reap_excess_workers(new_live);
                }
                live = new_live;
            }
        }
    }

    /// Runs on worker 0 between the two `workers_changed` rendezvous, while
    /// every other live worker is blocked at the second one.
    fn commit_resize(&self, old: usize) {
        let target = self.resize_target.load(Ordering::Acquire);
        let reached = if target > old {
            let gate = Arc::new(StartGate::new());
            let mut reached = old;
            for proc in old..target {
                match self.spawn_worker(proc, Some(Arc::clone(&gate))) {
                    Ok(()) => reached = proc + 1,
                    Err(err) => {
                        self.record_failure(err);
                        break;
                    }
                }
            }
            // New workers read the pool size after the gate opens, so a
            // partial spawn still yields a consistent arity.
            self.live_workers.store(reached, Ordering::Release);
            *self.reduction.write() = fresh_reduction(reached);
            gate.open();
            reached
        } else {
            self.live_workers.store(target, Ordering::Release);
            *self.reduction.write() = fresh_reduction(target);
            target
        };
        self.resize_pending.store(false, Ordering::Release);
        tracing::debug!(from = old, to = reached, "worker pool resized");
    }

    fn reap_excess_workers(&self, new_live: usize) {
        let mut handles = self.handles.lock();
        let excess: Vec<usize> = handles
            .keys()
            .copied()
            .filter(|proc| *proc >= new_live)
            .collect();
        for proc in excess {
            if let Some(handle) = handles.remove(&proc) {
                let _ = handle.join();
            }
        }
    }
}

fn fresh_reduction(workers: usize) -> Vec<CachePadded<AtomicBool>> {
    (0..workers)
        .map(|_| CachePadded::new(AtomicBool::new(false)))
        .collect()
}
