/// Frame bookkeeping shared between the scheduler and its collaborators.
///
/// Two live instances exist inside the engine: the *animation* state, advanced
/// once per logical frame by the phase that owns time, and the *render* state,
/// which is copied from it at the transaction phase and may lag under
/// pipelining. Collaborators only ever see immutable snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameState {
    /// Monotonically increasing serial number; advances on every frame, even
    /// while time is stopped.
    pub frame_serial: u64,
    /// Animation frame counter; frozen while time is stopped.
    pub animation_frame: u64,
    /// Animation time in seconds, derived from the engine's time mode.
    pub time: f64,
}
