//! # Presentation Clock
//!
//! The external time source that maps wall-clock time to stream time.
//!
//! ## Plain English Explanation
//!
//! A video file says "show this frame at 4.2 seconds". The clock answers
//! "what stream time is it right now?". The pacing queue compares the two
//! and waits for the difference.
//!
//! A reading is a *pair*: the stream time and the wall instant it was
//! sampled at. Keeping both lets a consumer extrapolate forward if the
//! reading is a little old by the time it is used.

use std::time::Instant;

use parking_lot::Mutex;

/// Stream time correlated with the wall instant it was sampled at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockReading {
    /// Stream time in nanoseconds
    pub clock_ns: i64,
    /// Wall-clock instant of the sample
    pub system: Instant,
}

/// Source of presentation time. Shared between the presenter and the
/// pacing thread.
pub trait PresentationClock: Send + Sync {
    fn correlated_time(&self) -> ClockReading;
}

// ============================================
// SYSTEM CLOCK
// ============================================

/// A presentation clock driven by the monotonic system clock.
///
/// Starts paused at stream time zero. Supports start, pause, seek and
/// rate changes, which is enough to drive a presenter without a real
/// media pipeline.
#[derive(Debug)]
pub struct SystemClock {
    inner: Mutex<SystemClockState>,
}

#[derive(Debug)]
struct SystemClockState {
    /// Stream time at `anchor`
    anchor_ns: i64,
    anchor: Instant,
    running: bool,
    rate: f32,
}

impl SystemClockState {
    fn now_ns(&self, at: Instant) -> i64 {
        if !self.running {
            return self.anchor_ns;
        }
        let elapsed = at.saturating_duration_since(self.anchor).as_nanos() as f64;
        self.anchor_ns + (elapsed * self.rate as f64) as i64
    }

    fn re_anchor(&mut self, at: Instant) {
        self.anchor_ns = self.now_ns(at);
        self.anchor = at;
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SystemClockState {
                anchor_ns: 0,
                anchor: Instant::now(),
                running: false,
                rate: 1.0,
            }),
        }
    }

    /// Starts (or resumes) the clock, optionally jumping to `position_ns`.
    pub fn start(&self, position_ns: Option<i64>) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.re_anchor(now);
        if let Some(position) = position_ns {
            state.anchor_ns = position;
        }
        state.running = true;
    }

    /// Freezes stream time where it is.
    pub fn pause(&self) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.re_anchor(now);
        state.running = false;
    }

    /// Pauses and rewinds to zero.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.running = false;
        state.anchor_ns = 0;
        state.anchor = Instant::now();
    }

    pub fn set_rate(&self, rate: f32) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.re_anchor(now);
        state.rate = rate;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationClock for SystemClock {
    fn correlated_time(&self) -> ClockReading {
        let now = Instant::now();
        let state = self.inner.lock();
        ClockReading {
            clock_ns: state.now_ns(now),
            system: now,
        }
    }
}

// ============================================
// MANUAL CLOCK
// ============================================

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ns: Mutex<i64>,
}

impl ManualClock {
    pub fn new(time_ns: i64) -> Self {
        Self {
            time_ns: Mutex::new(time_ns),
        }
    }

    pub fn set(&self, time_ns: i64) {
        *self.time_ns.lock() = time_ns;
    }

    pub fn advance(&self, delta_ns: i64) {
        *self.time_ns.lock() += delta_ns;
    }
}

impl PresentationClock for ManualClock {
    fn correlated_time(&self) -> ClockReading {
        ClockReading {
            clock_ns: *self.time_ns.lock(),
            system: Instant::now(),
        }
    }
}

// ============================================
// TESTS
// ============================================
