//! # Rendering Backend
//!
//! The consumer at the end of the pipeline: whatever actually puts pixels
//! on a display (a GPU swap chain, a window, a file writer in tests).
//!
//! ## Plain English Explanation
//!
//! The presenter decides *when* a frame is shown. The backend decides
//! *how*. It also owns the display device, so it is the one who knows
//! whether the device got lost and how fast the screen refreshes.

use crate::frame::{Frame, FrameBuffer};
use crate::source::VideoFormat;

// ============================================
// BACKEND ERRORS
// ============================================

/// Failures reported by a rendering backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Device lost or hung; recoverable with a reset
    #[error("display device lost")]
    DeviceLost,

    /// Device gone for good
    #[error("display device removed")]
    DeviceRemoved,

    #[error("format not supported by the backend: {0}")]
    UnsupportedFormat(String),

    #[error("failed to allocate frame buffers: {0}")]
    Allocation(String),

    #[error("present failed: {0}")]
    Present(String),
}

/// Device condition as seen just before a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    Ok,
    /// Lost or hung; call [`RenderBackend::reset_device`]
    NeedsReset,
    /// Removed; the stream cannot continue
    Fatal,
}

/// What to put on screen.
#[derive(Debug, Clone, Copy)]
pub enum PresentRequest<'a> {
    /// Show this frame
    Frame(&'a Frame),
    /// Show again the last image the backend presented
    RepaintLast,
    /// Show a black image
    Blank,
}

// ============================================
// RENDER BACKEND
// ============================================

/// The rendering collaborator.
///
/// Called from the host's threads and from the pacing thread, so
/// implementations synchronize internally.
pub trait RenderBackend: Send + Sync {
    /// Put `request` on screen. `target_ns` is the frame's presentation
    /// time (0 when presented immediately).
    fn present(&self, request: PresentRequest<'_>, target_ns: i64) -> Result<(), BackendError>;

    fn check_health(&self) -> DeviceHealth;

    /// Recreate the device after [`DeviceHealth::NeedsReset`].
    fn reset_device(&self) -> Result<(), BackendError>;

    /// Allocate `count` buffers for `format`.
    fn create_frames(&self, format: &VideoFormat, count: usize) -> Result<Vec<FrameBuffer>, BackendError>;

    /// Drop everything tied to the current format.
    fn release_resources(&self);

    fn supports_format(&self, format: &VideoFormat) -> bool {
        let _ = format;
        true
    }

    /// Display refresh rate in Hz, 0 if unknown.
    fn refresh_rate_hz(&self) -> u32;

    fn display_width(&self) -> u32;

    fn display_height(&self) -> u32;
}
