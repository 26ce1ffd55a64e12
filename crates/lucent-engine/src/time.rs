//! Animation time control.
//!
//! The clock is read and advanced only by the phase that owns frame state
//! (worker 0 at the top of a frame); control methods may be called from any
//! thread and take effect on the next advance.

use std::time::Instant;

use parking_lot::Mutex;

use lucent_interface::FrameState;

/// How animation time relates to wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeMode {
    /// Time follows the wall clock, scaled by `scale`.
    RealTime { scale: f64 },
    /// Each animation frame advances time by `1 / fps` seconds regardless of
    /// how fast frames are actually produced.
    FixedRate { fps: f64 },
    /// Time never advances on its own; only `set_time` moves it.
    Static,
}

impl Default for TimeMode {
    fn default() -> Self {
        TimeMode::RealTime { scale: 1.0 }
    }
}

#[derive(Debug)]
struct ClockState {
    mode: TimeMode,
    /// Subtracted from the raw source before scaling; adjusted so that time
    /// is continuous across mode changes and stop/start cycles.
    offset: f64,
    /// Wall-clock seconds at the moment time was stopped.
    stopped_at: f64,
    stopped: bool,
    /// Last value handed out, reused while stopped or in static mode.
    current: f64,
}

pub struct FrameClock {
    epoch: Instant,
    state: Mutex<ClockState>,
}

impl FrameClock {
    pub fn new(mode: TimeMode) -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(ClockState {
                mode,
                offset: 0.0,
                stopped_at: 0.0,
                stopped: false,
                current: 0.0,
            }),
        }
    }

    fn now_seconds(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn set_mode(&self, mode: TimeMode) {
        let now = self.now_seconds();
        let mut state = self.state.lock();
        // Keep the observable time continuous across the switch.
        let current = state.current;
        state.mode = mode;
        state.offset = match mode {
            TimeMode::RealTime { scale } if scale != 0.0 => now - current / scale,
            // Fixed-rate time is an absolute timeline over animation frames.
            _ => 0.0,
        };
    }

    pub fn mode(&self) -> TimeMode {
        self.state.lock().mode
    }

    /// Forces the animation time to `time` without changing the mode.
    pub fn set_time(&self, time: f64) {
        let now = self.now_seconds();
        let mut state = self.state.lock();
        state.current = time;
        match state.mode {
            TimeMode::RealTime { scale } if scale != 0.0 => {
                state.offset = now - time / scale;
            }
            _ => {}
        }
        if state.stopped {
            state.stopped_at = now;
        }
    }

    pub fn stop(&self) {
        let now = self.now_seconds();
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped_at = now;
            state.stopped = true;
        }
    }

    pub fn start(&self) {
        let now = self.now_seconds();
        let mut state = self.state.lock();
        if state.stopped {
            // Exclude the paused span from real-time computation.
            state.offset += now - state.stopped_at;
            state.stopped = false;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Advances `frame` by one logical frame. The serial number always moves;
    /// animation frame and time freeze while the clock is stopped.
    pub fn advance(&self, frame: &mut FrameState) {
        let now = self.now_seconds();
        let mut state = self.state.lock();
        frame.frame_serial += 1;
        if state.stopped {
            frame.time = state.current;
            return;
        }
        frame.animation_frame += 1;
        match state.mode {
            TimeMode::RealTime { scale } => {
                state.current = (now - state.offset) * scale;
            }
            TimeMode::FixedRate { fps } => {
                if fps > 0.0 {
                    state.current = frame.animation_frame as f64 / fps + state.offset;
                }
            }
            TimeMode::Static => {}
        }
        frame.time = state.current;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(TimeMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rate_advances_by_frame_period() {
        let clock = FrameClock::new(TimeMode::FixedRate { fps: 10.0 });
        let mut frame = FrameState::default();
        clock.advance(&mut frame);
        assert_eq!(frame.frame_serial, 1);
        assert_eq!(frame.animation_frame, 1);
        assert!((frame.time - 0.1).abs() < 1e-9);
        clock.advance(&mut frame);
        assert!((frame.time - 0.2).abs() < 1e-9);
    }

    #[test]
    fn stopped_clock_freezes_animation_but_not_serial() {
        let clock = FrameClock::new(TimeMode::FixedRate { fps: 10.0 });
        let mut frame = FrameState::default();
        clock.advance(&mut frame);
        clock.stop();
        assert!(clock.is_stopped());
        let frozen_time = frame.time;
        clock.advance(&mut frame);
        clock.advance(&mut frame);
        assert_eq!(frame.frame_serial, 3);
        assert_eq!(frame.animation_frame, 1);
        assert_eq!(frame.time, frozen_time);
        clock.start();
        clock.advance(&mut frame);
        assert_eq!(frame.animation_frame, 2);
    }

    #[test]
    fn static_mode_only_moves_on_set_time() {
        let clock = FrameClock::new(TimeMode::Static);
        let mut frame = FrameState::default();
        clock.advance(&mut frame);
        assert_eq!(frame.time, 0.0);
        clock.set_time(4.5);
        clock.advance(&mut frame);
        assert_eq!(frame.time, 4.5);
    }
}
