//! # Configuration Module
//!
//! This module handles the tunable settings of the presenter.
//!
//! ## Plain English Explanation
//!
//! A presenter has a few knobs that trade smoothness against latency:
//! - How many frame buffers circulate (more = more slack, more memory)
//! - How late a frame may be before the pacing queue skips it
//! - How "now" is computed from the presentation clock
//! - How long the pacing thread may sleep in one go
//!
//! Everything else is negotiated at runtime with the source and backend.

use std::time::Duration;

use crate::scheduler::TimingMode;
use crate::source::FrameRate;

/// Buffers circulating between the pool and the renderer by default.
pub const DEFAULT_BUFFER_COUNT: usize = 3;

/// Most buffers a presenter will allocate.
pub const MAX_BUFFER_COUNT: usize = 16;

// ============================================
// MAIN CONFIGURATION
// ============================================

/// All configuration options for a presenter
#[derive(Clone, Debug, PartialEq)]
pub struct PresenterConfig {
    // ----------------------------------------
    // BUFFER SETTINGS
    // ----------------------------------------
    /// Frame buffers allocated per output format
    ///
    /// ## Plain English
    /// Three is enough for one on screen, one queued, one being filled.
    pub buffer_count: usize,

    /// Frame rate assumed when the negotiated format declares none
    pub default_frame_rate: FrameRate,

    // ----------------------------------------
    // PACING SETTINGS
    // ----------------------------------------
    /// Late frames beyond this many frame durations are skipped when a
    /// newer frame is waiting (0 = never skip)
    pub frame_drop_threshold: i32,

    /// How the pacing thread derives the current stream time
    pub timing_mode: TimingMode,

    /// Longest single sleep of the pacing thread, in milliseconds
    ///
    /// ## Plain English
    /// The thread wakes up at least this often to re-read the clock, so
    /// clock jumps are noticed quickly.
    pub max_sleep_ms: u64,

    /// Playback rate before the clock reports one
    pub initial_rate: f32,
}

impl PresenterConfig {
    /// Fewer buffers and aggressive skipping of late frames.
    ///
    /// ## When to Use
    /// Live sources where showing the newest picture matters more than
    /// showing every picture.
    pub fn low_latency() -> Self {
        Self {
            buffer_count: 2,
            frame_drop_threshold: 1,
            max_sleep_ms: 20,
            ..Self::default()
        }
    }

    /// More buffers, never skip, extrapolated timing.
    pub fn smooth_playback() -> Self {
        Self {
            buffer_count: 5,
            frame_drop_threshold: 0,
            timing_mode: TimingMode::Extrapolated,
            ..Self::default()
        }
    }

    /// Validates the configuration and returns every problem found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.buffer_count == 0 || self.buffer_count > MAX_BUFFER_COUNT {
            errors.push(ConfigError::BufferCountOutOfRange(self.buffer_count));
        }

        if self.default_frame_rate.frame_duration_ns().is_none() {
            errors.push(ConfigError::InvalidFrameRate(self.default_frame_rate));
        }

        if self.frame_drop_threshold < 0 {
            errors.push(ConfigError::NegativeDropThreshold(self.frame_drop_threshold));
        }

        if self.max_sleep_ms == 0 || self.max_sleep_ms > 1_000 {
            errors.push(ConfigError::SleepCapOutOfRange(self.max_sleep_ms));
        }

        if !self.initial_rate.is_finite() {
            errors.push(ConfigError::InvalidRate(self.initial_rate));
        }

        errors
    }

    /// [`max_sleep_ms`](Self::max_sleep_ms) as a `Duration`.
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            default_frame_rate: FrameRate::new(30, 1),
            frame_drop_threshold: 0,
            timing_mode: TimingMode::ClockTime,
            max_sleep_ms: 100,
            initial_rate: 1.0,
        }
    }
}

// ============================================
// CONFIGURATION ERRORS
// ============================================

/// Errors that can occur with configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    BufferCountOutOfRange(usize),
    InvalidFrameRate(FrameRate),
    NegativeDropThreshold(i32),
    SleepCapOutOfRange(u64),
    InvalidRate(f32),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferCountOutOfRange(count) => {
                write!(f, "Buffer count {} is outside valid range (1-{})", count, MAX_BUFFER_COUNT)
            }
            Self::InvalidFrameRate(rate) => {
                write!(f, "Frame rate {}/{} is not valid", rate.numerator, rate.denominator)
            }
            Self::NegativeDropThreshold(threshold) => {
                write!(f, "Frame drop threshold {} must not be negative", threshold)
            }
            Self::SleepCapOutOfRange(ms) => {
                write!(f, "Maximum sleep {} ms is outside valid range (1-1000)", ms)
            }
            Self::InvalidRate(rate) => write!(f, "Initial rate {} is not a finite number", rate),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================
// TESTS
// ============================================
