//! Rendezvous primitives for the frame pipeline.
//!
//! The pipeline barriers take their arity per call: the number of
//! participants is fixed for a whole frame but changes across
//! `workers_changed` transitions, so a `std::sync::Barrier` with a baked-in
//! count does not fit.

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// A reusable rendezvous point. `arity` threads enter `wait`; none proceeds
/// until all have entered. Successive rendezvous on the same barrier may use
/// different arities as long as every participant of one rendezvous agrees on
/// the count, which the phase protocol guarantees.
pub struct Barrier {
    state: Mutex<BarrierState>,
    all_arrived: Condvar,
}

impl Barrier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            all_arrived: Condvar::new(),
        }
    }

    pub fn wait(&self, arity: usize) {
        debug_assert!(arity >= 1, "barrier arity must be at least one");
        let mut state = self.state.lock();
        if state.arrived + 1 >= arity {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.all_arrived.notify_all();
        } else {
            state.arrived += 1;
            let generation = state.generation;
            while state.generation == generation {
                self.all_arrived.wait(&mut state);
            }
        }
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot gate that worker threads wait on before entering the phase loop.
///
/// `begin_rendering` spawns every worker behind a closed gate, then either
/// opens it once all spawns succeeded or aborts it so the already-spawned
/// threads exit without ever touching engine state.
pub struct StartGate {
    state: Mutex<Option<bool>>,
    resolved: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            resolved: Condvar::new(),
        }
    }

    pub fn open(&self) {
        self.resolve(true);
    }

    pub fn abort(&self) {
        self.resolve(false);
    }

    fn resolve(&self, proceed: bool) {
        let mut state = self.state.lock();
        *state = Some(proceed);
        self.resolved.notify_all();
    }

    /// Blocks until the gate is resolved; returns `true` when the worker
    /// should enter the phase loop.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while state.is_none() {
            self.resolved.wait(&mut state);
        }
        state.unwrap_or(false)
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}
