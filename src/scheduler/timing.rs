//! Timing math for the pacing thread.
//!
//! Kept free of threads and locks so the decisions can be tested directly.

use std::time::{Duration, Instant};

use crate::clock::ClockReading;

/// Shortest wait the pacing thread will sleep for.
const MIN_WAIT: Duration = Duration::from_micros(100);

/// How "now" is derived from a clock reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimingMode {
    /// Use the clock's stream time as reported
    #[default]
    ClockTime,
    /// Advance the reported stream time by the wall time elapsed since
    /// the reading was sampled, scaled by the playback rate
    Extrapolated,
}

impl TimingMode {
    /// Current stream time in nanoseconds.
    pub fn current_time(&self, reading: ClockReading, rate: f32, at: Instant) -> i64 {
        match self {
            Self::ClockTime => reading.clock_ns,
            Self::Extrapolated => {
                let elapsed = at.saturating_duration_since(reading.system).as_nanos() as f64;
                reading.clock_ns + (elapsed * rate as f64) as i64
            }
        }
    }
}

/// What to do with the frame at the head of the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Due within the presentation window
    OnTime,
    /// Past its window by `by_ns`
    Late { by_ns: i64 },
    /// Too early; sleep this long and look again
    Wait(Duration),
}

/// Classifies a frame `delta_ns` ahead of now (negative = behind).
///
/// A frame is presentable from three quarters of a frame early to one
/// quarter late. Waits are scaled by the rate and capped at `max_sleep`.
pub(crate) fn decide(delta_ns: i64, quarter_ns: i64, rate: f32, max_sleep: Duration) -> Decision {
    if delta_ns < -quarter_ns {
        return Decision::Late { by_ns: -delta_ns };
    }

    let window_ns = quarter_ns.saturating_mul(3);
    if delta_ns > window_ns {
        let speed = (rate.abs() as f64).max(f64::EPSILON);
        let wait_ns = ((delta_ns - window_ns) as f64 / speed) as u64;
        let wait = Duration::from_nanos(wait_ns).min(max_sleep).max(MIN_WAIT);
        return Decision::Wait(wait);
    }

    Decision::OnTime
}

/// True when a late frame should be skipped under `threshold` frames of lateness.
///
/// A threshold of zero or less never skips.
pub(crate) fn exceeds_drop_threshold(late_by_ns: i64, threshold: i32, frame_duration_ns: i64) -> bool {
    threshold > 0 && late_by_ns > (threshold as i64).saturating_mul(frame_duration_ns)
}
