//! # Error Types Module
//!
//! This module defines the error type returned by the presenter.
//!
//! ## Plain English Explanation
//!
//! Not every problem is a disaster. A video presenter runs into "problems"
//! dozens of times a second that are really just traffic lights:
//!
//! - "All buffers are busy" means wait for one to come back
//! - "The source has no picture yet" means wait for input
//! - "The display device was reset" means rebuild it and keep going
//!
//! Only a few things actually stop playback (the display device is gone,
//! internal bookkeeping is corrupt). [`ErrorCategory`] tells them apart so
//! callers can react proportionately.

use std::fmt;

use crate::backend::BackendError;
use crate::buffer::PoolError;
use crate::config::ConfigError;
use crate::scheduler::SchedulerError;

// ============================================
// ERROR CATEGORY
// ============================================

/// How serious an error is and who deals with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Expected throttling (pool exhausted, no input); never logged as an error
    Backpressure,
    /// Format not agreed or changed; handled by renegotiating
    Negotiation,
    /// Display device lost; handled by a reset
    Device,
    /// Playback cannot continue; reported to the host once
    Fatal,
    /// Internal bookkeeping violated (unknown or doubly returned buffer)
    Invariant,
    /// The caller asked for something not allowed right now
    Usage,
}

// ============================================
// MAIN PRESENTER ERROR
// ============================================

/// The error type for every presenter operation.
#[derive(Debug)]
pub enum PresenterError {
    /// The presenter has been shut down (or aborted after a fatal error)
    Shutdown,

    /// The operation is not valid in the current state
    InvalidRequest(&'static str),

    /// No output format has been negotiated
    FormatNotSet,

    /// None of the source's formats is usable
    NoAcceptableFormat,

    /// Rate outside what the display can keep up with
    UnsupportedRate { requested: f32, nearest: f32 },

    /// Frame pool misuse
    Pool(PoolError),

    /// Pacing queue failure
    Scheduler(SchedulerError),

    /// Rendering backend failure
    Backend(BackendError),

    /// The display device needed a reset and the reset failed
    DeviceResetFailed(BackendError),

    /// The frame source failed outright
    Source(String),

    /// Invalid configuration
    Config(ConfigError),
}

impl PresenterError {
    /// Classifies this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Shutdown | Self::InvalidRequest(_) | Self::UnsupportedRate { .. } | Self::Config(_) => {
                ErrorCategory::Usage
            }
            Self::FormatNotSet | Self::NoAcceptableFormat => ErrorCategory::Negotiation,
            Self::Pool(PoolError::NotInitialized) => ErrorCategory::Negotiation,
            Self::Pool(_) => ErrorCategory::Invariant,
            Self::Scheduler(SchedulerError::NotStarted) => ErrorCategory::Backpressure,
            Self::Scheduler(SchedulerError::AlreadyRunning) => ErrorCategory::Usage,
            Self::Scheduler(SchedulerError::Spawn(_)) => ErrorCategory::Fatal,
            Self::Scheduler(SchedulerError::Present(e)) | Self::Backend(e) => backend_category(e),
            Self::DeviceResetFailed(_) | Self::Source(_) => ErrorCategory::Fatal,
        }
    }

    /// True for errors that end playback.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Fatal | ErrorCategory::Invariant)
    }
}

fn backend_category(error: &BackendError) -> ErrorCategory {
    match error {
        BackendError::DeviceLost => ErrorCategory::Device,
        BackendError::UnsupportedFormat(_) => ErrorCategory::Negotiation,
        BackendError::DeviceRemoved | BackendError::Allocation(_) | BackendError::Present(_) => {
            ErrorCategory::Fatal
        }
    }
}

impl fmt::Display for PresenterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "Presenter is shut down"),
            Self::InvalidRequest(reason) => write!(f, "Invalid request: {}", reason),
            Self::FormatNotSet => write!(f, "Output format is not set"),
            Self::NoAcceptableFormat => write!(f, "No acceptable output format offered by the source"),
            Self::UnsupportedRate { requested, nearest } => {
                write!(f, "Rate {} is not supported (nearest supported rate is {})", requested, nearest)
            }
            Self::Pool(e) => write!(f, "Frame pool error: {}", e),
            Self::Scheduler(e) => write!(f, "Pacing queue error: {}", e),
            Self::Backend(e) => write!(f, "Rendering backend error: {}", e),
            Self::DeviceResetFailed(e) => write!(f, "Display device reset failed: {}", e),
            Self::Source(reason) => write!(f, "Frame source failed: {}", reason),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for PresenterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pool(e) => Some(e),
            Self::Scheduler(e) => Some(e),
            Self::Backend(e) | Self::DeviceResetFailed(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PoolError> for PresenterError {
    fn from(err: PoolError) -> Self {
        PresenterError::Pool(err)
    }
}

impl From<SchedulerError> for PresenterError {
    fn from(err: SchedulerError) -> Self {
        PresenterError::Scheduler(err)
    }
}

impl From<BackendError> for PresenterError {
    fn from(err: BackendError) -> Self {
        PresenterError::Backend(err)
    }
}

impl From<ConfigError> for PresenterError {
    fn from(err: ConfigError) -> Self {
        PresenterError::Config(err)
    }
}

/// Result type alias for presenter operations
pub type PresenterResult<T> = Result<T, PresenterError>;

// ============================================
// TESTS
// ============================================
