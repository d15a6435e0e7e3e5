//! # Frame Clock
//!
//! Turns wall-clock time into frame steps.
//!
//! - Fixed timestep: elapsed time accumulates and is consumed in constant
//!   steps. When the engine falls behind, at most `max_catch_up` steps run
//!   back to back and the rest of the backlog is dropped.
//! - Variable timestep: one step per frame with the measured delta, clamped
//!   to `max_delta`.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::{TimestepConfig, MAX_TICK_RATE};

/// Steps to run for one pass of the frame loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSteps {
    /// Number of `tick` calls to make.
    pub count: u32,
    /// Delta in seconds for each of them.
    pub dt: f32,
}

#[derive(Clone, Copy, Debug)]
enum ClockMode {
    Fixed { step: Duration, max_catch_up: u32 },
    Variable { max_delta: Duration },
}

/// Frame timing controller.
#[derive(Debug)]
pub struct FrameClock {
    mode: ClockMode,
    last: Instant,
    accumulator: Duration,
    /// Steps discarded because the backlog exceeded the catch-up cap.
    dropped_steps: u64,
}

impl FrameClock {
    /// Creates a clock for the given policy, starting now.
    #[must_use]
    pub fn new(config: &TimestepConfig) -> Self {
        let mode = match *config {
            TimestepConfig::Fixed { tick_rate, max_catch_up } => ClockMode::Fixed {
                step: Duration::from_micros(1_000_000 / u64::from(tick_rate.clamp(1, MAX_TICK_RATE))),
                max_catch_up: max_catch_up.max(1),
            },
            TimestepConfig::Variable { max_delta_ms } => ClockMode::Variable {
                max_delta: Duration::from_millis(max_delta_ms.max(1)),
            },
        };

        Self {
            mode,
            last: Instant::now(),
            accumulator: Duration::ZERO,
            dropped_steps: 0,
        }
    }

    /// Forgets time elapsed so far. Call right before entering the loop.
    pub fn reset(&mut self) {
        self.last = Instant::now();
        self.accumulator = Duration::ZERO;
    }

    /// Fixed step length, if this is a fixed-timestep clock.
    #[must_use]
    pub fn step(&self) -> Option<Duration> {
        match self.mode {
            ClockMode::Fixed { step, .. } => Some(step),
            ClockMode::Variable { .. } => None,
        }
    }

    /// Total steps dropped by the catch-up cap.
    #[must_use]
    pub const fn dropped_steps(&self) -> u64 {
        self.dropped_steps
    }

    /// Measures time since the last call and returns the steps to run.
    pub fn advance(&mut self) -> FrameSteps {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        self.advance_by(elapsed)
    }

    /// Same as [`advance`](Self::advance) with an explicit elapsed time.
    pub fn advance_by(&mut self, elapsed: Duration) -> FrameSteps {
        match self.mode {
            ClockMode::Fixed { step, max_catch_up } => {
                self.accumulator += elapsed;
                let due = u32::try_from(self.accumulator.as_nanos() / step.as_nanos()).unwrap_or(u32::MAX);
                self.accumulator -= step * due;

                // After a stall longer than u32::MAX steps the remainder is
                // still banked; the cap below drops it over the next frames.
                let count = if due > max_catch_up {
                    let dropped = due - max_catch_up;
                    self.dropped_steps += u64::from(dropped);
                    warn!(due, dropped, "frame loop fell behind, dropping steps");
                    max_catch_up
                } else {
                    due
                };

                FrameSteps {
                    count,
                    dt: step.as_secs_f32(),
                }
            }
            ClockMode::Variable { max_delta } => FrameSteps {
                count: 1,
                dt: elapsed.min(max_delta).as_secs_f32(),
            },
        }
    }

    /// Sleeps until the next fixed step is due. Returns at once for a
    /// variable timestep.
    pub fn wait_for_next_step(&self) {
        if let ClockMode::Fixed { step, .. } = self.mode {
            let banked = self.accumulator + self.last.elapsed();
            if let Some(remaining) = step.checked_sub(banked) {
                std::thread::sleep(remaining);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(tick_rate: u32, max_catch_up: u32) -> FrameClock {
        FrameClock::new(&TimestepConfig::Fixed { tick_rate, max_catch_up })
    }

    #[test]
    fn test_fixed_step_length() {
        let clock = fixed(60, 5);
        assert_eq!(clock.step(), Some(Duration::from_micros(16_666)));
    }

    #[test]
    fn test_fixed_accumulates_partial_steps() {
        let mut clock = fixed(100, 5);

        assert_eq!(clock.advance_by(Duration::from_millis(4)).count, 0);
        assert_eq!(clock.advance_by(Duration::from_millis(7)).count, 1);
        // 1ms left over + 19ms = two steps.
        let steps = clock.advance_by(Duration::from_millis(19));
        assert_eq!(steps.count, 2);
        assert!((steps.dt - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_fixed_caps_catch_up() {
        let mut clock = fixed(100, 3);

        let steps = clock.advance_by(Duration::from_millis(105));
        assert_eq!(steps.count, 3);
        assert_eq!(clock.dropped_steps(), 7);
        // The 5ms remainder is kept, the dropped backlog is not.
        assert_eq!(clock.advance_by(Duration::from_millis(5)).count, 1);
    }

    #[test]
    fn test_fastest_tick_rate_steps_every_microsecond() {
        let mut clock = fixed(MAX_TICK_RATE, 5);
        assert_eq!(clock.step(), Some(Duration::from_micros(1)));
        assert_eq!(clock.advance_by(Duration::from_micros(3)).count, 3);

        // Out-of-range rates are clamped rather than producing a zero step.
        let mut clock = fixed(MAX_TICK_RATE * 2, 5);
        assert_eq!(clock.step(), Some(Duration::from_micros(1)));
        assert_eq!(clock.advance_by(Duration::from_millis(1)).count, 5);
    }

    #[test]
    fn test_long_stall_saturates_due_steps() {
        let mut clock = fixed(MAX_TICK_RATE, 2);
        // Far more than u32::MAX one-microsecond steps.
        let stall = Duration::from_secs(5_000);

        let steps = clock.advance_by(stall);
        assert_eq!(steps.count, 2);
        assert_eq!(clock.dropped_steps(), u64::from(u32::MAX - 2));
    }

    #[test]
    fn test_variable_clamps_delta() {
        let mut clock = FrameClock::new(&TimestepConfig::Variable { max_delta_ms: 50 });
        assert_eq!(clock.step(), None);

        let steps = clock.advance_by(Duration::from_millis(20));
        assert_eq!(steps.count, 1);
        assert!((steps.dt - 0.02).abs() < 1e-6);

        assert!((clock.advance_by(Duration::from_secs(2)).dt - 0.05).abs() < 1e-6);
    }
}
