// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wall-clock primitives used by the scheduler and the request processors.
//!
//! * [`Stopwatch`]: measures time since it was started.
//! * [`Timer`]: a fixed-interval gate. Resetting anchors it to *now*, so a
//!   long stall never queues a burst of missed intervals.
//! * [`Delta`]: elapsed time between two consecutive logical steps.
//! * [`ProfileTimer`]: averages the duration of repeated invocations.

use std::time::{Duration, Instant};

/// Measures the wall-clock time since it was started.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start_time: Instant,
}

impl Stopwatch {
    /// Creates a new Stopwatch, started immediately.
    #[inline]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the stopwatch was started.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the elapsed time since the stopwatch was started in seconds as f64.
    #[inline]
    pub fn elapsed_secs_f64(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Restarts the stopwatch and returns the time that elapsed before the restart.
    #[inline]
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now.saturating_duration_since(self.start_time);
        self.start_time = now;
        lap
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-interval gate.
///
/// [`is_passed_time`](Timer::is_passed_time) is a pure function of the wall
/// clock: it turns true once at least `interval` has elapsed since the last
/// anchor and stays true until [`reset_start_time`](Timer::reset_start_time)
/// is called.
#[derive(Debug, Clone)]
pub struct Timer {
    start_time: Instant,
    interval: Duration,
}

impl Timer {
    /// Creates a timer anchored to now.
    pub fn new(interval: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            interval,
        }
    }

    /// Creates a timer from an interval expressed in seconds.
    ///
    /// Negative or non-finite values are clamped to zero.
    pub fn from_secs_f64(interval: f64) -> Self {
        Self::new(secs_to_duration(interval))
    }

    /// Returns `true` once at least the interval has elapsed since the anchor.
    pub fn is_passed_time(&self) -> bool {
        self.start_time.elapsed() >= self.interval
    }

    /// Time left until [`is_passed_time`](Timer::is_passed_time) turns true.
    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.start_time.elapsed())
    }

    /// Anchors the timer to the current instant (not to the previous deadline).
    pub fn reset_start_time(&mut self) {
        self.start_time = Instant::now();
    }

    /// The current interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replaces the interval and anchors the timer to now.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.start_time = Instant::now();
    }
}

/// Elapsed time between two consecutive calls to [`Delta::update`].
#[derive(Debug, Clone)]
pub struct Delta {
    last_sample: Instant,
    delta: Duration,
}

impl Delta {
    /// Creates a delta whose first sample is now and whose value is zero.
    pub fn new() -> Self {
        Self {
            last_sample: Instant::now(),
            delta: Duration::ZERO,
        }
    }

    /// Samples the clock and stores the time elapsed since the previous sample.
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now.saturating_duration_since(self.last_sample);
        self.last_sample = now;
    }

    /// The last computed delta.
    pub fn delta(&self) -> Duration {
        self.delta
    }
}

impl Default for Delta {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates invocation durations and reports their average on [`reset`](ProfileTimer::reset).
#[derive(Debug, Clone, Default)]
pub struct ProfileTimer {
    invocations: u32,
    total: Duration,
    running: Option<Stopwatch>,
    final_time: Duration,
}

impl ProfileTimer {
    /// Creates an idle profile timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new invocation.
    pub fn start_invocation(&mut self) {
        self.running = Some(Stopwatch::new());
    }

    /// Stops the current invocation and adds its duration to the total.
    pub fn stop_invocation(&mut self) {
        match self.running.take() {
            Some(watch) => {
                self.invocations += 1;
                self.total += watch.elapsed();
            }
            None => log::error!("ProfileTimer: stop_invocation called without a matching start."),
        }
    }

    /// Average duration computed by the last [`reset`](Self::reset).
    pub fn final_time(&self) -> Duration {
        self.final_time
    }

    /// Computes the average of the recorded invocations and clears the accumulator.
    pub fn reset(&mut self) {
        self.final_time = if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total / self.invocations
        };
        self.invocations = 0;
        self.total = Duration::ZERO;
        self.running = None;
    }
}

/// Converts seconds to a [`Duration`], clamping invalid input to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SMALL_DURATION_MS: u64 = 15;
    const SLEEP_DURATION_MS: u64 = 60;
    const SLEEP_MARGIN_MS: u64 = 200;

    #[test]
    fn stopwatch_elapsed_time_near_zero_initially() {
        let watch = Stopwatch::new();
        assert!(
            watch.elapsed() < Duration::from_millis(SMALL_DURATION_MS),
            "Initial elapsed duration should be very small"
        );
    }

    #[test]
    fn stopwatch_elapsed_time_after_delay() {
        let watch = Stopwatch::new();
        thread::sleep(Duration::from_millis(SLEEP_DURATION_MS));

        let elapsed = watch.elapsed();
        assert!(elapsed >= Duration::from_millis(SLEEP_DURATION_MS));
        assert!(
            elapsed < Duration::from_millis(SLEEP_DURATION_MS + SLEEP_MARGIN_MS),
            "Elapsed duration ({elapsed:?}) should be < sleep duration + margin"
        );
        assert!(watch.elapsed_secs_f64() >= SLEEP_DURATION_MS as f64 / 1000.0);
    }

    #[test]
    fn stopwatch_lap_restarts() {
        let mut watch = Stopwatch::new();
        thread::sleep(Duration::from_millis(20));
        let lap = watch.lap();
        assert!(lap >= Duration::from_millis(20));
        assert!(watch.elapsed() < lap);
    }

    #[test]
    fn timer_is_not_passed_right_after_creation() {
        let timer = Timer::new(Duration::from_millis(50));
        assert!(!timer.is_passed_time());
    }

    #[test]
    fn timer_passes_after_interval() {
        let timer = Timer::new(Duration::from_millis(30));
        thread::sleep(Duration::from_millis(40));
        assert!(timer.is_passed_time());
        // Stays passed until reset.
        assert!(timer.is_passed_time());
    }

    #[test]
    fn timer_reset_anchors_to_now_not_previous_deadline() {
        let mut timer = Timer::new(Duration::from_millis(30));
        // Stall for several intervals.
        thread::sleep(Duration::from_millis(100));
        assert!(timer.is_passed_time());

        timer.reset_start_time();
        // Anchored to the deadline (start + interval) the timer would still be
        // passed; anchored to now it is not.
        assert!(!timer.is_passed_time());
    }

    #[test]
    fn timer_set_interval_reanchors() {
        let mut timer = Timer::new(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert!(timer.is_passed_time());
        timer.set_interval(Duration::from_millis(500));
        assert!(!timer.is_passed_time());
        assert_eq!(timer.interval(), Duration::from_millis(500));
        assert!(timer.remaining() > Duration::from_millis(400));
    }

    #[test]
    fn timer_from_invalid_secs_is_zero() {
        assert_eq!(Timer::from_secs_f64(-1.0).interval(), Duration::ZERO);
        assert_eq!(Timer::from_secs_f64(f64::NAN).interval(), Duration::ZERO);
        assert!(Timer::from_secs_f64(0.0).is_passed_time());
    }

    #[test]
    fn delta_measures_time_between_updates() {
        let mut delta = Delta::new();
        assert_eq!(delta.delta(), Duration::ZERO);

        thread::sleep(Duration::from_millis(25));
        delta.update();
        let first = delta.delta();
        assert!(first >= Duration::from_millis(25));

        delta.update();
        assert!(delta.delta() < first, "Back-to-back updates should yield a tiny delta");
    }

    #[test]
    fn profile_timer_averages_invocations() {
        let mut timer = ProfileTimer::new();
        for _ in 0..2 {
            timer.start_invocation();
            thread::sleep(Duration::from_millis(10));
            timer.stop_invocation();
        }
        timer.reset();
        assert!(timer.final_time() >= Duration::from_millis(10));

        // Nothing recorded since the last reset.
        timer.reset();
        assert_eq!(timer.final_time(), Duration::ZERO);
    }

    #[test]
    fn profile_timer_stop_without_start_is_ignored() {
        let mut timer = ProfileTimer::new();
        timer.stop_invocation();
        timer.reset();
        assert_eq!(timer.final_time(), Duration::ZERO);
    }
}
